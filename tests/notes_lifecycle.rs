use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_carnetd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn carnetd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(resp: &serde_json::Value) -> String {
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    resp["error"]["code"].as_str().expect("error code").to_string()
}

struct Fixture {
    classe_id: String,
    eleve_ids: Vec<String>,
    composition_id: String,
}

fn setup_classe(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    eleves: &[(&str, &str)],
) -> Fixture {
    let ws = temp_dir("carnet-notes");
    request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );
    let classe = request_ok(
        stdin,
        reader,
        "setup-classe",
        "classes.create",
        json!({
            "nom": "CM2 A",
            "niveau": "CM2",
            "anneeScolaire": "2024-2025",
            "enseignant": "M. Diallo"
        }),
    );
    let classe_id = classe["id"].as_str().expect("classe id").to_string();

    let mut eleve_ids = Vec::new();
    for (i, (nom, prenom)) in eleves.iter().enumerate() {
        let eleve = request_ok(
            stdin,
            reader,
            &format!("setup-eleve-{}", i),
            "eleves.create",
            json!({ "nom": nom, "prenom": prenom, "classeId": classe_id }),
        );
        eleve_ids.push(eleve["id"].as_str().expect("eleve id").to_string());
    }

    let composition = request_ok(
        stdin,
        reader,
        "setup-composition",
        "compositions.create",
        json!({
            "classeId": classe_id,
            "numero": 1,
            "date": "2024-11-15",
            "titre": "Composition N°1",
            "mois": "Novembre"
        }),
    );
    let composition_id = composition["id"].as_str().expect("composition id").to_string();

    Fixture {
        classe_id,
        eleve_ids,
        composition_id,
    }
}

#[test]
fn note_create_update_delete_with_derived_fields_and_rank() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let fx = setup_classe(
        &mut stdin,
        &mut reader,
        &[("Traoré", "Awa"), ("Koné", "Moussa")],
    );

    // Worked example 1: 40.5+35+15.5+42 = 133 -> moyenne 7.82 -> B.
    let n1 = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "notes.create",
        json!({
            "compositionId": fx.composition_id,
            "eleveId": fx.eleve_ids[0],
            "etudeTexte": 40.5, "aem": 35.0, "dictee": 15.5, "math": 42.0
        }),
    );
    assert_eq!(n1["total"].as_f64(), Some(133.0));
    assert_eq!(n1["moyenne"].as_f64(), Some(7.82));
    assert_eq!(n1["observation"].as_str(), Some("B"));
    assert_eq!(n1["rang"].as_i64(), Some(1));
    let n1_id = n1["id"].as_str().expect("note id").to_string();

    // Worked example 2 beats it: 150 -> 8.82 -> A, takes rank 1.
    let n2 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "notes.create",
        json!({
            "compositionId": fx.composition_id,
            "eleveId": fx.eleve_ids[1],
            "etudeTexte": 45.0, "aem": 40.0, "dictee": 18.0, "math": 47.0
        }),
    );
    assert_eq!(n2["total"].as_f64(), Some(150.0));
    assert_eq!(n2["moyenne"].as_f64(), Some(8.82));
    assert_eq!(n2["observation"].as_str(), Some("A"));
    assert_eq!(n2["rang"].as_i64(), Some(1));
    let n2_id = n2["id"].as_str().expect("note id").to_string();

    let n1_after = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "notes.get",
        json!({ "noteId": n1_id }),
    );
    assert_eq!(n1_after["rang"].as_i64(), Some(2));

    // One note per (composition, eleve).
    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "notes.create",
        json!({
            "compositionId": fx.composition_id,
            "eleveId": fx.eleve_ids[0],
            "etudeTexte": 1, "aem": 1, "dictee": 1, "math": 1
        }),
    );
    assert_eq!(error_code(&dup), "conflict");

    // Update recomputes every derived field and re-ranks the session.
    let n1_updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "notes.update",
        json!({
            "noteId": n1_id,
            "etudeTexte": 50.0, "aem": 50.0, "dictee": 20.0, "math": 50.0
        }),
    );
    assert_eq!(n1_updated["total"].as_f64(), Some(170.0));
    assert_eq!(n1_updated["moyenne"].as_f64(), Some(10.0));
    assert_eq!(n1_updated["observation"].as_str(), Some("A"));
    assert_eq!(n1_updated["rang"].as_i64(), Some(1));

    let n2_after = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "notes.get",
        json!({ "noteId": n2_id }),
    );
    assert_eq!(n2_after["rang"].as_i64(), Some(2));

    // Delete closes the gap for the survivor.
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "notes.delete",
        json!({ "noteId": n1_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "notes.list",
        json!({ "compositionId": fx.composition_id }),
    );
    let notes = listed["notes"].as_array().expect("notes array");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["id"].as_str(), Some(n2_id.as_str()));
    assert_eq!(notes[0]["rang"].as_i64(), Some(1));

    // Deleting a note never touches the roster.
    let eleves = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "eleves.list",
        json!({ "classeId": fx.classe_id }),
    );
    assert_eq!(eleves["eleves"].as_array().map(|a| a.len()), Some(2));
}

#[test]
fn note_errors_not_found_bad_params_and_dangling_refs() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let fx = setup_classe(&mut stdin, &mut reader, &[("Traoré", "Awa")]);

    for (id, method, params) in [
        ("1", "notes.get", json!({ "noteId": "missing" })),
        (
            "2",
            "notes.update",
            json!({ "noteId": "missing", "etudeTexte": 1, "aem": 1, "dictee": 1, "math": 1 }),
        ),
        ("3", "notes.delete", json!({ "noteId": "missing" })),
    ] {
        let resp = request(&mut stdin, &mut reader, id, method, params);
        assert_eq!(error_code(&resp), "not_found", "method {}", method);
    }

    let dangling_eleve = request(
        &mut stdin,
        &mut reader,
        "4",
        "notes.create",
        json!({
            "compositionId": fx.composition_id,
            "eleveId": "missing",
            "etudeTexte": 1, "aem": 1, "dictee": 1, "math": 1
        }),
    );
    assert_eq!(error_code(&dangling_eleve), "not_found");

    let dangling_composition = request(
        &mut stdin,
        &mut reader,
        "5",
        "notes.create",
        json!({
            "compositionId": "missing",
            "eleveId": fx.eleve_ids[0],
            "etudeTexte": 1, "aem": 1, "dictee": 1, "math": 1
        }),
    );
    assert_eq!(error_code(&dangling_composition), "not_found");

    let non_numeric = request(
        &mut stdin,
        &mut reader,
        "6",
        "notes.create",
        json!({
            "compositionId": fx.composition_id,
            "eleveId": fx.eleve_ids[0],
            "etudeTexte": "quarante", "aem": 1, "dictee": 1, "math": 1
        }),
    );
    assert_eq!(error_code(&non_numeric), "bad_params");

    // Out-of-range values are accepted, not rejected: no clamping here.
    let oversized = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "notes.create",
        json!({
            "compositionId": fx.composition_id,
            "eleveId": fx.eleve_ids[0],
            "etudeTexte": 60.0, "aem": 50.0, "dictee": 20.0, "math": 50.0
        }),
    );
    assert_eq!(oversized["total"].as_f64(), Some(180.0));
    assert_eq!(oversized["observation"].as_str(), Some("A"));
}
