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

fn composition_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let classe_id: String = row.get(1)?;
    let numero: i64 = row.get(2)?;
    let date: String = row.get(3)?;
    let titre: String = row.get(4)?;
    let mois: String = row.get(5)?;
    Ok(json!({
        "id": id,
        "classeId": classe_id,
        "numero": numero,
        "date": date,
        "titre": titre,
        "mois": mois
    }))
}

fn classe_exists(conn: &Connection, classe_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [classe_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn fetch_composition(
    conn: &Connection,
    composition_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        "SELECT id, classe_id, numero, date, titre, mois FROM compositions WHERE id = ?",
        [composition_id],
        composition_row_to_json,
    )
    .optional()
}

fn parse_create_params(req: &Request) -> Option<(String, i64, String, String, String)> {
    let classe_id = required_str(req, "classeId")?;
    let numero = req.params.get("numero").and_then(|v| v.as_i64())?;
    let date = required_str(req, "date")?;
    let titre = required_str(req, "titre")?;
    let mois = required_str(req, "mois")?;
    Some((classe_id, numero, date, titre, mois))
}

fn handle_compositions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "compositions": [] }));
    };

    let result = match required_str(req, "classeId") {
        Some(cid) => {
            let mut stmt = match conn.prepare(
                "SELECT id, classe_id, numero, date, titre, mois
                 FROM compositions WHERE classe_id = ?
                 ORDER BY numero
                 LIMIT ?",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            stmt.query_map((&cid, LIST_MAX_ROWS), composition_row_to_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        }
        None => {
            let mut stmt = match conn.prepare(
                "SELECT id, classe_id, numero, date, titre, mois
                 FROM compositions
                 ORDER BY numero
                 LIMIT ?",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            stmt.query_map([LIST_MAX_ROWS], composition_row_to_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        }
    };

    match result {
        Ok(compositions) => ok(&req.id, json!({ "compositions": compositions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_compositions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some((classe_id, numero, date, titre, mois)) = parse_create_params(req) else {
        return err(
            &req.id,
            "bad_params",
            "classeId, numero, date, titre and mois are required",
            None,
        );
    };

    match classe_exists(conn, &classe_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "classe not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let composition_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO compositions(id, classe_id, numero, date, titre, mois)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&composition_id, &classe_id, numero, &date, &titre, &mois),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "compositions" })),
        );
    }

    ok(
        &req.id,
        json!({
            "id": composition_id,
            "classeId": classe_id,
            "numero": numero,
            "date": date,
            "titre": titre,
            "mois": mois
        }),
    )
}

fn handle_compositions_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(composition_id) = required_str(req, "compositionId") else {
        return err(&req.id, "bad_params", "missing compositionId", None);
    };

    match fetch_composition(conn, &composition_id) {
        Ok(Some(composition)) => ok(&req.id, composition),
        Ok(None) => err(&req.id, "not_found", "composition not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_compositions_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(composition_id) = required_str(req, "compositionId") else {
        return err(&req.id, "bad_params", "missing compositionId", None);
    };
    let Some((classe_id, numero, date, titre, mois)) = parse_create_params(req) else {
        return err(
            &req.id,
            "bad_params",
            "classeId, numero, date, titre and mois are required",
            None,
        );
    };

    match classe_exists(conn, &classe_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "classe not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let updated = match conn.execute(
        "UPDATE compositions SET classe_id = ?, numero = ?, date = ?, titre = ?, mois = ?
         WHERE id = ?",
        (&classe_id, numero, &date, &titre, &mois, &composition_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "composition not found", None);
    }

    match fetch_composition(conn, &composition_id) {
        Ok(Some(composition)) => ok(&req.id, composition),
        Ok(None) => err(&req.id, "not_found", "composition not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_compositions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(composition_id) = required_str(req, "compositionId") else {
        return err(&req.id, "bad_params", "missing compositionId", None);
    };

    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM compositions WHERE id = ?",
            [&composition_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "composition not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM notes WHERE composition_id = ?",
        [&composition_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "notes" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM compositions WHERE id = ?", [&composition_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "compositions" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "compositions.list" => Some(handle_compositions_list(state, req)),
        "compositions.create" => Some(handle_compositions_create(state, req)),
        "compositions.get" => Some(handle_compositions_get(state, req)),
        "compositions.update" => Some(handle_compositions_update(state, req)),
        "compositions.delete" => Some(handle_compositions_delete(state, req)),
        _ => None,
    }
}
