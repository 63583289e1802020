use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const LIST_MAX_ROWS: i64 = 1000;

fn required_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn eleve_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let classe_id: String = row.get(1)?;
    let nom: String = row.get(2)?;
    let prenom: String = row.get(3)?;
    let date_naissance: Option<String> = row.get(4)?;
    let updated_at: Option<String> = row.get(5)?;
    Ok(json!({
        "id": id,
        "classeId": classe_id,
        "nom": nom,
        "prenom": prenom,
        "dateNaissance": date_naissance,
        "updatedAt": updated_at
    }))
}

fn fetch_eleve(conn: &Connection, eleve_id: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        "SELECT id, classe_id, nom, prenom, date_naissance, updated_at FROM eleves WHERE id = ?",
        [eleve_id],
        eleve_row_to_json,
    )
    .optional()
}

fn classe_exists(conn: &Connection, classe_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [classe_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn handle_eleves_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "eleves": [] }));
    };

    let classe_id = required_str(req, "classeId");

    let result = match classe_id {
        Some(cid) => {
            let mut stmt = match conn.prepare(
                "SELECT id, classe_id, nom, prenom, date_naissance, updated_at
                 FROM eleves WHERE classe_id = ?
                 ORDER BY nom, prenom
                 LIMIT ?",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            stmt.query_map((&cid, LIST_MAX_ROWS), eleve_row_to_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        }
        None => {
            let mut stmt = match conn.prepare(
                "SELECT id, classe_id, nom, prenom, date_naissance, updated_at
                 FROM eleves
                 ORDER BY nom, prenom
                 LIMIT ?",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            stmt.query_map([LIST_MAX_ROWS], eleve_row_to_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        }
    };

    match result {
        Ok(eleves) => ok(&req.id, json!({ "eleves": eleves })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_eleves_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (Some(nom), Some(prenom), Some(classe_id)) = (
        required_str(req, "nom"),
        required_str(req, "prenom"),
        required_str(req, "classeId"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "nom, prenom and classeId are required",
            None,
        );
    };
    let date_naissance = optional_str(req, "dateNaissance");

    match classe_exists(conn, &classe_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "classe not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let eleve_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO eleves(id, classe_id, nom, prenom, date_naissance, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&eleve_id, &classe_id, &nom, &prenom, &date_naissance, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "eleves" })),
        );
    }

    match fetch_eleve(conn, &eleve_id) {
        Ok(Some(eleve)) => ok(&req.id, eleve),
        Ok(None) => err(&req.id, "not_found", "eleve not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_eleves_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(eleve_id) = required_str(req, "eleveId") else {
        return err(&req.id, "bad_params", "missing eleveId", None);
    };

    match fetch_eleve(conn, &eleve_id) {
        Ok(Some(eleve)) => ok(&req.id, eleve),
        Ok(None) => err(&req.id, "not_found", "eleve not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_eleves_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(eleve_id) = required_str(req, "eleveId") else {
        return err(&req.id, "bad_params", "missing eleveId", None);
    };
    let (Some(nom), Some(prenom), Some(classe_id)) = (
        required_str(req, "nom"),
        required_str(req, "prenom"),
        required_str(req, "classeId"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "nom, prenom and classeId are required",
            None,
        );
    };
    let date_naissance = optional_str(req, "dateNaissance");

    match classe_exists(conn, &classe_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "classe not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let now = chrono::Utc::now().to_rfc3339();
    let updated = match conn.execute(
        "UPDATE eleves SET classe_id = ?, nom = ?, prenom = ?, date_naissance = ?, updated_at = ?
         WHERE id = ?",
        (&classe_id, &nom, &prenom, &date_naissance, &now, &eleve_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "eleve not found", None);
    }

    match fetch_eleve(conn, &eleve_id) {
        Ok(Some(eleve)) => ok(&req.id, eleve),
        Ok(None) => err(&req.id, "not_found", "eleve not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_eleves_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(eleve_id) = required_str(req, "eleveId") else {
        return err(&req.id, "bad_params", "missing eleveId", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM eleves WHERE id = ?", [&eleve_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "eleve not found", None);
    }

    // Compositions that lose a note here must be re-ranked so their
    // remaining notes keep a dense 1..N classement.
    let affected: Vec<String> = {
        let mut stmt = match conn
            .prepare("SELECT DISTINCT composition_id FROM notes WHERE eleve_id = ?")
        {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&eleve_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM notes WHERE eleve_id = ?", [&eleve_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "notes" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM eleves WHERE id = ?", [&eleve_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "eleves" })),
        );
    }

    for composition_id in &affected {
        if let Err(e) = calc::classement(&tx, composition_id) {
            let _ = tx.rollback();
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "eleves.list" => Some(handle_eleves_list(state, req)),
        "eleves.create" => Some(handle_eleves_create(state, req)),
        "eleves.get" => Some(handle_eleves_get(state, req)),
        "eleves.update" => Some(handle_eleves_update(state, req)),
        "eleves.delete" => Some(handle_eleves_delete(state, req)),
        _ => None,
    }
}
