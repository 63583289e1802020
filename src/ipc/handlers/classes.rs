use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
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

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.nom,
           c.niveau,
           c.annee_scolaire,
           c.enseignant,
           (SELECT COUNT(*) FROM eleves e WHERE e.classe_id = c.id) AS eleve_count,
           (SELECT COUNT(*) FROM compositions cp WHERE cp.classe_id = c.id) AS composition_count
         FROM classes c
         ORDER BY c.nom
         LIMIT ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([LIST_MAX_ROWS], |row| {
            let id: String = row.get(0)?;
            let nom: String = row.get(1)?;
            let niveau: String = row.get(2)?;
            let annee_scolaire: String = row.get(3)?;
            let enseignant: String = row.get(4)?;
            let eleve_count: i64 = row.get(5)?;
            let composition_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "nom": nom,
                "niveau": niveau,
                "anneeScolaire": annee_scolaire,
                "enseignant": enseignant,
                "eleveCount": eleve_count,
                "compositionCount": composition_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (Some(nom), Some(niveau), Some(annee_scolaire), Some(enseignant)) = (
        required_str(req, "nom"),
        required_str(req, "niveau"),
        required_str(req, "anneeScolaire"),
        required_str(req, "enseignant"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "nom, niveau, anneeScolaire and enseignant are required",
            None,
        );
    };

    let classe_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, nom, niveau, annee_scolaire, enseignant) VALUES(?, ?, ?, ?, ?)",
        (&classe_id, &nom, &niveau, &annee_scolaire, &enseignant),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(
        &req.id,
        json!({
            "id": classe_id,
            "nom": nom,
            "niveau": niveau,
            "anneeScolaire": annee_scolaire,
            "enseignant": enseignant
        }),
    )
}

fn fetch_classe(
    conn: &rusqlite::Connection,
    classe_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        "SELECT id, nom, niveau, annee_scolaire, enseignant FROM classes WHERE id = ?",
        [classe_id],
        |row| {
            let id: String = row.get(0)?;
            let nom: String = row.get(1)?;
            let niveau: String = row.get(2)?;
            let annee_scolaire: String = row.get(3)?;
            let enseignant: String = row.get(4)?;
            Ok(json!({
                "id": id,
                "nom": nom,
                "niveau": niveau,
                "anneeScolaire": annee_scolaire,
                "enseignant": enseignant
            }))
        },
    )
    .optional()
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(classe_id) = required_str(req, "classeId") else {
        return err(&req.id, "bad_params", "missing classeId", None);
    };

    match fetch_classe(conn, &classe_id) {
        Ok(Some(classe)) => ok(&req.id, classe),
        Ok(None) => err(&req.id, "not_found", "classe not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(classe_id) = required_str(req, "classeId") else {
        return err(&req.id, "bad_params", "missing classeId", None);
    };
    let (Some(nom), Some(niveau), Some(annee_scolaire), Some(enseignant)) = (
        required_str(req, "nom"),
        required_str(req, "niveau"),
        required_str(req, "anneeScolaire"),
        required_str(req, "enseignant"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "nom, niveau, anneeScolaire and enseignant are required",
            None,
        );
    };

    let updated = match conn.execute(
        "UPDATE classes SET nom = ?, niveau = ?, annee_scolaire = ?, enseignant = ? WHERE id = ?",
        (&nom, &niveau, &annee_scolaire, &enseignant, &classe_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "classe not found", None);
    }

    match fetch_classe(conn, &classe_id) {
        Ok(Some(classe)) => ok(&req.id, classe),
        Ok(None) => err(&req.id, "not_found", "classe not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(classe_id) = required_str(req, "classeId") else {
        return err(&req.id, "bad_params", "missing classeId", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&classe_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "classe not found", None);
    }

    // An élève of this class can hold notes in another class's
    // compositions; those compositions survive the cascade and must be
    // re-ranked once their notes are gone.
    let surviving: Vec<String> = {
        let mut stmt = match conn.prepare(
            "SELECT DISTINCT n.composition_id
             FROM notes n
             JOIN compositions c ON c.id = n.composition_id
             WHERE n.eleve_id IN (SELECT id FROM eleves WHERE classe_id = ?1)
               AND c.classe_id <> ?1",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match stmt
            .query_map([&classe_id], |r| r.get::<_, String>(0))
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

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM notes
         WHERE composition_id IN (SELECT id FROM compositions WHERE classe_id = ?)
            OR eleve_id IN (SELECT id FROM eleves WHERE classe_id = ?)",
        [&classe_id, &classe_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "notes" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM compositions WHERE classe_id = ?", [&classe_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "compositions" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM eleves WHERE classe_id = ?", [&classe_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "eleves" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM classes WHERE id = ?", [&classe_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    for composition_id in &surviving {
        if let Err(e) = calc::classement(&tx, composition_id) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "compositionId": composition_id })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.get" => Some(handle_classes_get(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
