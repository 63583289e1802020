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

#[test]
fn suivi_tracks_ungraded_sessions_with_explicit_null_markers() {
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let ws = temp_dir("carnet-suivi");
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );
    let classe = request_ok(
        &mut stdin,
        &mut reader,
        "classe",
        "classes.create",
        json!({
            "nom": "CE2",
            "niveau": "CE2",
            "anneeScolaire": "2024-2025",
            "enseignant": "Mme Keita"
        }),
    );
    let classe_id = classe["id"].as_str().expect("classe id").to_string();

    // Created out of order on purpose; numero drives the sequence.
    let comp2 = request_ok(
        &mut stdin,
        &mut reader,
        "comp-2",
        "compositions.create",
        json!({
            "classeId": classe_id, "numero": 2,
            "date": "2025-01-20", "titre": "Composition N°2", "mois": "Janvier"
        }),
    );
    let comp1 = request_ok(
        &mut stdin,
        &mut reader,
        "comp-1",
        "compositions.create",
        json!({
            "classeId": classe_id, "numero": 1,
            "date": "2024-11-15", "titre": "Composition N°1", "mois": "Novembre"
        }),
    );
    let comp1_id = comp1["id"].as_str().expect("id").to_string();
    let comp2_id = comp2["id"].as_str().expect("id").to_string();

    let eleve_a = request_ok(
        &mut stdin,
        &mut reader,
        "eleve-a",
        "eleves.create",
        json!({ "nom": "Bamba", "prenom": "Fatou", "classeId": classe_id }),
    );
    let eleve_b = request_ok(
        &mut stdin,
        &mut reader,
        "eleve-b",
        "eleves.create",
        json!({ "nom": "Sangaré", "prenom": "Issa", "classeId": classe_id }),
    );
    let eleve_a_id = eleve_a["id"].as_str().expect("id").to_string();
    let eleve_b_id = eleve_b["id"].as_str().expect("id").to_string();

    // Only (composition 1, élève A) is graded.
    request_ok(
        &mut stdin,
        &mut reader,
        "note",
        "notes.create",
        json!({
            "compositionId": comp1_id,
            "eleveId": eleve_a_id,
            "etudeTexte": 40.5, "aem": 35.0, "dictee": 15.5, "math": 42.0
        }),
    );

    let suivi_a = request_ok(
        &mut stdin,
        &mut reader,
        "suivi-a",
        "suivi.eleve",
        json!({ "classeId": classe_id, "eleveId": eleve_a_id }),
    );
    let entries = suivi_a["suivi"].as_array().expect("suivi entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["composition"]["numero"].as_i64(), Some(1));
    assert_eq!(entries[1]["composition"]["numero"].as_i64(), Some(2));
    assert_eq!(entries[0]["note"]["moyenne"].as_f64(), Some(7.82));
    // Ungraded session keeps its slot as an explicit null, not a gap.
    assert!(entries[1]["note"].is_null());

    let suivi_b = request_ok(
        &mut stdin,
        &mut reader,
        "suivi-b",
        "suivi.eleve",
        json!({ "classeId": classe_id, "eleveId": eleve_b_id }),
    );
    let entries = suivi_b["suivi"].as_array().expect("suivi entries");
    assert_eq!(entries.len(), 2);
    assert!(entries[0]["note"].is_null());
    assert!(entries[1]["note"].is_null());

    let suivi_classe = request_ok(
        &mut stdin,
        &mut reader,
        "suivi-classe",
        "suivi.classe",
        json!({ "classeId": classe_id }),
    );
    let compositions = suivi_classe["compositions"].as_array().expect("compositions");
    assert_eq!(compositions.len(), 2);
    assert_eq!(compositions[0]["id"].as_str(), Some(comp1_id.as_str()));
    assert_eq!(compositions[1]["id"].as_str(), Some(comp2_id.as_str()));

    let rows = suivi_classe["suivi"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    for row in rows {
        let notes = row["notes"].as_array().expect("aligned notes");
        assert_eq!(notes.len(), compositions.len());
        let eleve_id = row["eleve"]["id"].as_str().expect("eleve id");
        if eleve_id == eleve_a_id {
            assert_eq!(notes[0]["moyenne"].as_f64(), Some(7.82));
            assert!(notes[1].is_null());
        } else {
            assert_eq!(eleve_id, eleve_b_id);
            assert!(notes[0].is_null());
            assert!(notes[1].is_null());
        }
    }

    let missing = request(
        &mut stdin,
        &mut reader,
        "suivi-missing",
        "suivi.classe",
        json!({ "classeId": "missing" }),
    );
    assert_eq!(missing["ok"].as_bool(), Some(false));
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    let missing_eleve = request(
        &mut stdin,
        &mut reader,
        "suivi-missing-eleve",
        "suivi.eleve",
        json!({ "classeId": classe_id, "eleveId": "missing" }),
    );
    assert_eq!(missing_eleve["error"]["code"].as_str(), Some("not_found"));
}
