use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;

/// Subject maxima: étude de texte 50, AEM 50, dictée 20, math 50.
/// The moyenne is normalized from this fixed 170-point scale to 0-10.
pub const BAREME_TOTAL: f64 = 170.0;

/// 2-decimal rounding, half away from zero. Matches the reference
/// moyenne/pourcentage values to the cent.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawScores {
    pub etude_texte: f64,
    pub aem: f64,
    pub dictee: f64,
    pub math: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteDerived {
    pub total: f64,
    pub moyenne: f64,
    pub observation: &'static str,
}

/// Observation band for a moyenne on the 0-10 scale.
/// Lower bounds are inclusive; evaluated top-down.
pub fn observation(moyenne: f64) -> &'static str {
    if moyenne >= 8.5 {
        "A"
    } else if moyenne >= 7.0 {
        "B"
    } else if moyenne >= 5.0 {
        "C"
    } else {
        "D"
    }
}

/// Derives total, moyenne and observation from the four raw sub-scores.
/// Out-of-range values are accepted and computed over; bounding the
/// inputs is the caller's concern, not this layer's.
pub fn compute_note(scores: &RawScores) -> NoteDerived {
    let total = scores.etude_texte + scores.aem + scores.dictee + scores.math;
    let moyenne = round2(total / BAREME_TOTAL * 10.0);
    NoteDerived {
        total,
        moyenne,
        observation: observation(moyenne),
    }
}

/// Reassigns rang for every note of a composition: 1-based position in
/// descending-total order. The sort is stable over insertion order
/// (rowid), so ties keep their relative fetch order. Callers run this
/// inside the same transaction as the triggering write.
pub fn classement(conn: &Connection, composition_id: &str) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT id, total FROM notes WHERE composition_id = ? ORDER BY rowid",
    )?;
    let mut rows: Vec<(String, f64)> = stmt
        .query_map([composition_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut update = conn.prepare("UPDATE notes SET rang = ? WHERE id = ?")?;
    for (idx, (id, _)) in rows.iter().enumerate() {
        update.execute(((idx as i64) + 1, id))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistiques {
    pub effectif: usize,
    pub presents: usize,
    pub absents: usize,
    pub admis: usize,
    pub pourcentage_reussite: f64,
}

/// Session summary over the moyennes of a composition. Attendance is
/// not tracked: presents mirrors effectif and absents is always 0,
/// kept only because the output shape carries them.
pub fn statistiques(moyennes: &[f64]) -> Statistiques {
    let effectif = moyennes.len();
    let admis = moyennes.iter().filter(|m| **m >= 5.0).count();
    let pourcentage_reussite = if effectif > 0 {
        round2(admis as f64 / effectif as f64 * 100.0)
    } else {
        0.0
    };
    Statistiques {
        effectif,
        presents: effectif,
        absents: 0,
        admis,
        pourcentage_reussite,
    }
}
