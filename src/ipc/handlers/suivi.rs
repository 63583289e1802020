use crate::ipc::error::{err, ok};
use crate::ipc::handlers::notes;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const LIST_MAX_ROWS: i64 = 1000;

fn required_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

/// Compositions of a class, ordered by numero. Both projections share
/// this sequence so note arrays stay index-aligned with it.
fn compositions_of_classe(
    conn: &Connection,
    classe_id: &str,
) -> rusqlite::Result<Vec<(String, serde_json::Value)>> {
    let mut stmt = conn.prepare(
        "SELECT id, classe_id, numero, date, titre, mois
         FROM compositions WHERE classe_id = ?
         ORDER BY numero
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map((classe_id, LIST_MAX_ROWS), |row| {
            let id: String = row.get(0)?;
            let cid: String = row.get(1)?;
            let numero: i64 = row.get(2)?;
            let date: String = row.get(3)?;
            let titre: String = row.get(4)?;
            let mois: String = row.get(5)?;
            Ok((
                id.clone(),
                json!({
                    "id": id,
                    "classeId": cid,
                    "numero": numero,
                    "date": date,
                    "titre": titre,
                    "mois": mois
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    rows
}

fn handle_suivi_eleve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (Some(classe_id), Some(eleve_id)) =
        (required_str(req, "classeId"), required_str(req, "eleveId"))
    else {
        return err(&req.id, "bad_params", "classeId and eleveId are required", None);
    };

    match row_exists(conn, "SELECT 1 FROM classes WHERE id = ?", &classe_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "classe not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match row_exists(conn, "SELECT 1 FROM eleves WHERE id = ?", &eleve_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "eleve not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let compositions = match compositions_of_classe(conn, &classe_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut suivi = Vec::with_capacity(compositions.len());
    for (composition_id, composition) in compositions {
        // Null marks "not yet graded"; the slot stays in the sequence.
        let note = match notes::fetch_note_for(conn, &composition_id, &eleve_id) {
            Ok(v) => v.unwrap_or(serde_json::Value::Null),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        suivi.push(json!({
            "composition": composition,
            "note": note
        }));
    }

    ok(&req.id, json!({ "suivi": suivi }))
}

fn handle_suivi_classe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(classe_id) = required_str(req, "classeId") else {
        return err(&req.id, "bad_params", "missing classeId", None);
    };

    match row_exists(conn, "SELECT 1 FROM classes WHERE id = ?", &classe_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "classe not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let compositions = match compositions_of_classe(conn, &classe_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let eleves: Vec<(String, serde_json::Value)> = {
        let mut stmt = match conn.prepare(
            "SELECT id, classe_id, nom, prenom, date_naissance, updated_at
             FROM eleves WHERE classe_id = ?
             ORDER BY nom, prenom
             LIMIT ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map((&classe_id, LIST_MAX_ROWS), |row| {
                let id: String = row.get(0)?;
                let cid: String = row.get(1)?;
                let nom: String = row.get(2)?;
                let prenom: String = row.get(3)?;
                let date_naissance: Option<String> = row.get(4)?;
                let updated_at: Option<String> = row.get(5)?;
                Ok((
                    id.clone(),
                    json!({
                        "id": id,
                        "classeId": cid,
                        "nom": nom,
                        "prenom": prenom,
                        "dateNaissance": date_naissance,
                        "updatedAt": updated_at
                    }),
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let mut suivi = Vec::with_capacity(eleves.len());
    for (eleve_id, eleve) in eleves {
        let mut notes_aligned = Vec::with_capacity(compositions.len());
        for (composition_id, _) in &compositions {
            let note = match notes::fetch_note_for(conn, composition_id, &eleve_id) {
                Ok(v) => v.unwrap_or(serde_json::Value::Null),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            notes_aligned.push(note);
        }
        suivi.push(json!({
            "eleve": eleve,
            "notes": notes_aligned
        }));
    }

    let compositions_out: Vec<serde_json::Value> =
        compositions.into_iter().map(|(_, c)| c).collect();

    ok(
        &req.id,
        json!({
            "compositions": compositions_out,
            "suivi": suivi
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "suivi.eleve" => Some(handle_suivi_eleve(state, req)),
        "suivi.classe" => Some(handle_suivi_classe(state, req)),
        _ => None,
    }
}
