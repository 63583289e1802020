use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;

const LIST_MAX_ROWS: i64 = 1000;

fn handle_stats_composition(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(composition_id) = req
        .params
        .get("compositionId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
    else {
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

    let mut stmt = match conn.prepare(
        "SELECT moyenne FROM notes WHERE composition_id = ? ORDER BY rowid LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let moyennes = match stmt
        .query_map((&composition_id, LIST_MAX_ROWS), |r| r.get::<_, f64>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let stats = calc::statistiques(&moyennes);
    match serde_json::to_value(stats) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "stats.composition" => Some(handle_stats_composition(state, req)),
        _ => None,
    }
}
