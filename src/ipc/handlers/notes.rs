use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const LIST_MAX_ROWS: i64 = 1000;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

/// The four raw sub-scores of a note. Any finite number is accepted;
/// bounds are not this layer's concern.
fn parse_scores(req: &Request) -> Result<calc::RawScores, HandlerErr> {
    let get = |key: &'static str| -> Result<f64, HandlerErr> {
        req.params
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: format!("{} must be a number", key),
                details: None,
            })
    };
    Ok(calc::RawScores {
        etude_texte: get("etudeTexte")?,
        aem: get("aem")?,
        dictee: get("dictee")?,
        math: get("math")?,
    })
}

fn required_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn note_row_to_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let composition_id: String = row.get(1)?;
    let eleve_id: String = row.get(2)?;
    let etude_texte: f64 = row.get(3)?;
    let aem: f64 = row.get(4)?;
    let dictee: f64 = row.get(5)?;
    let math: f64 = row.get(6)?;
    let total: f64 = row.get(7)?;
    let moyenne: f64 = row.get(8)?;
    let observation: String = row.get(9)?;
    let rang: Option<i64> = row.get(10)?;
    let updated_at: Option<String> = row.get(11)?;
    Ok(json!({
        "id": id,
        "compositionId": composition_id,
        "eleveId": eleve_id,
        "etudeTexte": etude_texte,
        "aem": aem,
        "dictee": dictee,
        "math": math,
        "total": total,
        "moyenne": moyenne,
        "observation": observation,
        "rang": rang,
        "updatedAt": updated_at
    }))
}

const NOTE_COLUMNS: &str = "id, composition_id, eleve_id, etude_texte, aem, dictee, math,
     total, moyenne, observation, rang, updated_at";

pub fn fetch_note(
    conn: &Connection,
    note_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        &format!("SELECT {} FROM notes WHERE id = ?", NOTE_COLUMNS),
        [note_id],
        note_row_to_json,
    )
    .optional()
}

pub fn fetch_note_for(
    conn: &Connection,
    composition_id: &str,
    eleve_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM notes WHERE composition_id = ? AND eleve_id = ?",
            NOTE_COLUMNS
        ),
        [composition_id, eleve_id],
        note_row_to_json,
    )
    .optional()
}

fn require_row(
    conn: &Connection,
    table: &'static str,
    id: &str,
) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    if found.is_some() {
        Ok(())
    } else {
        Err(HandlerErr {
            code: "not_found",
            message: format!("{} row not found", table),
            details: Some(json!({ "id": id })),
        })
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn create_note(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (Some(composition_id), Some(eleve_id)) = (
        required_str(req, "compositionId"),
        required_str(req, "eleveId"),
    ) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "compositionId and eleveId are required".to_string(),
            details: None,
        });
    };
    let scores = parse_scores(req)?;

    require_row(conn, "compositions", &composition_id)?;
    require_row(conn, "eleves", &eleve_id)?;

    let derived = calc::compute_note(&scores);
    let note_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    // rang starts unset; the classement pass below assigns it before
    // the caller ever sees the note.
    let inserted = tx.execute(
        "INSERT INTO notes(id, composition_id, eleve_id, etude_texte, aem, dictee, math,
                           total, moyenne, observation, rang, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
        (
            &note_id,
            &composition_id,
            &eleve_id,
            scores.etude_texte,
            scores.aem,
            scores.dictee,
            scores.math,
            derived.total,
            derived.moyenne,
            derived.observation,
            &now,
        ),
    );
    if let Err(e) = inserted {
        let _ = tx.rollback();
        if is_unique_violation(&e) {
            return Err(HandlerErr {
                code: "conflict",
                message: "a note already exists for this eleve in this composition".to_string(),
                details: Some(json!({
                    "compositionId": composition_id,
                    "eleveId": eleve_id
                })),
            });
        }
        return Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "notes" })),
        });
    }

    if let Err(e) = calc::classement(&tx, &composition_id) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        });
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    fetch_note(conn, &note_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "note not found after insert".to_string(),
            details: None,
        })
}

fn list_notes(conn: &Connection, req: &Request) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();
    if let Some(cid) = required_str(req, "compositionId") {
        clauses.push("composition_id = ?");
        params.push(Value::Text(cid));
    }
    if let Some(eid) = required_str(req, "eleveId") {
        clauses.push("eleve_id = ?");
        params.push(Value::Text(eid));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    // Unranked rows (mid-lifecycle only) sort last.
    let sql = format!(
        "SELECT {} FROM notes{} ORDER BY rang IS NULL, rang LIMIT ?",
        NOTE_COLUMNS, where_sql
    );
    params.push(Value::Integer(LIST_MAX_ROWS));

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(params_from_iter(params), note_row_to_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

fn update_note(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(note_id) = required_str(req, "noteId") else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing noteId".to_string(),
            details: None,
        });
    };
    let scores = parse_scores(req)?;

    // The composition/eleve references are immutable; only scores move.
    let composition_id: Option<String> = conn
        .query_row(
            "SELECT composition_id FROM notes WHERE id = ?",
            [&note_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(composition_id) = composition_id else {
        return Err(HandlerErr {
            code: "not_found",
            message: "note not found".to_string(),
            details: None,
        });
    };

    let derived = calc::compute_note(&scores);
    let now = chrono::Utc::now().to_rfc3339();

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    if let Err(e) = tx.execute(
        "UPDATE notes SET etude_texte = ?, aem = ?, dictee = ?, math = ?,
                          total = ?, moyenne = ?, observation = ?, updated_at = ?
         WHERE id = ?",
        (
            scores.etude_texte,
            scores.aem,
            scores.dictee,
            scores.math,
            derived.total,
            derived.moyenne,
            derived.observation,
            &now,
            &note_id,
        ),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        });
    }

    if let Err(e) = calc::classement(&tx, &composition_id) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        });
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    fetch_note(conn, &note_id)
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "note not found after update".to_string(),
            details: None,
        })
}

fn delete_note(conn: &Connection, req: &Request) -> Result<(), HandlerErr> {
    let Some(note_id) = required_str(req, "noteId") else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing noteId".to_string(),
            details: None,
        });
    };

    let composition_id: Option<String> = conn
        .query_row(
            "SELECT composition_id FROM notes WHERE id = ?",
            [&note_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some(composition_id) = composition_id else {
        return Err(HandlerErr {
            code: "not_found",
            message: "note not found".to_string(),
            details: None,
        });
    };

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    if let Err(e) = tx.execute("DELETE FROM notes WHERE id = ?", [&note_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "notes" })),
        });
    }

    // The composition shrank; remaining notes close the rank gap.
    if let Err(e) = calc::classement(&tx, &composition_id) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        });
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })
}

fn handle_notes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match create_note(conn, req) {
        Ok(note) => ok(&req.id, note),
        Err(e) => e.response(&req.id),
    }
}

fn handle_notes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "notes": [] }));
    };
    match list_notes(conn, req) {
        Ok(notes) => ok(&req.id, json!({ "notes": notes })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_notes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(note_id) = required_str(req, "noteId") else {
        return err(&req.id, "bad_params", "missing noteId", None);
    };
    match fetch_note(conn, &note_id) {
        Ok(Some(note)) => ok(&req.id, note),
        Ok(None) => err(&req.id, "not_found", "note not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_notes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match update_note(conn, req) {
        Ok(note) => ok(&req.id, note),
        Err(e) => e.response(&req.id),
    }
}

fn handle_notes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match delete_note(conn, req) {
        Ok(()) => ok(&req.id, json!({ "ok": true })),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notes.create" => Some(handle_notes_create(state, req)),
        "notes.list" => Some(handle_notes_list(state, req)),
        "notes.get" => Some(handle_notes_get(state, req)),
        "notes.update" => Some(handle_notes_update(state, req)),
        "notes.delete" => Some(handle_notes_delete(state, req)),
        _ => None,
    }
}
