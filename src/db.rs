use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("carnet.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            nom TEXT NOT NULL,
            niveau TEXT NOT NULL,
            annee_scolaire TEXT NOT NULL,
            enseignant TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS eleves(
            id TEXT PRIMARY KEY,
            classe_id TEXT NOT NULL,
            nom TEXT NOT NULL,
            prenom TEXT NOT NULL,
            date_naissance TEXT,
            updated_at TEXT,
            FOREIGN KEY(classe_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_eleves_classe ON eleves(classe_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS compositions(
            id TEXT PRIMARY KEY,
            classe_id TEXT NOT NULL,
            numero INTEGER NOT NULL,
            date TEXT NOT NULL,
            titre TEXT NOT NULL,
            mois TEXT NOT NULL,
            FOREIGN KEY(classe_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_compositions_classe ON compositions(classe_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_compositions_classe_numero ON compositions(classe_id, numero)",
        [],
    )?;

    // rang stays NULL until a classement pass assigns it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS notes(
            id TEXT PRIMARY KEY,
            composition_id TEXT NOT NULL,
            eleve_id TEXT NOT NULL,
            etude_texte REAL NOT NULL,
            aem REAL NOT NULL,
            dictee REAL NOT NULL,
            math REAL NOT NULL,
            total REAL NOT NULL,
            moyenne REAL NOT NULL,
            observation TEXT NOT NULL,
            rang INTEGER,
            updated_at TEXT,
            FOREIGN KEY(composition_id) REFERENCES compositions(id),
            FOREIGN KEY(eleve_id) REFERENCES eleves(id),
            UNIQUE(composition_id, eleve_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notes_composition ON notes(composition_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notes_eleve ON notes(eleve_id)",
        [],
    )?;

    Ok(conn)
}
