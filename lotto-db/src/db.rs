use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

use crate::models::{sort_chronological, DrawRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS draws (
    date     TEXT NOT NULL,
    n1       INTEGER NOT NULL,
    n2       INTEGER NOT NULL,
    n3       INTEGER NOT NULL,
    n4       INTEGER NOT NULL,
    n5       INTEGER NOT NULL,
    n6       INTEGER NOT NULL,
    bonus    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (date, n1, n2, n3, n4, n5, n6)
);
";

pub fn db_path() -> std::path::PathBuf {
    let mut path = std::env::current_dir().unwrap_or_default();
    path.push("data");
    path.push("lotto.db");
    path
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Impossible de créer le répertoire {:?}", parent))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Impossible d'ouvrir la base {:?}", path))?;
    Ok(conn)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .context("Échec de la migration")?;
    Ok(())
}

pub fn insert_draw(conn: &Connection, draw: &DrawRecord) -> Result<bool> {
    let n = &draw.numbers;
    let changed = conn.execute(
        "INSERT OR IGNORE INTO draws (date, n1, n2, n3, n4, n5, n6, bonus)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![draw.date, n[0], n[1], n[2], n[3], n[4], n[5], draw.bonus],
    ).context("Échec de l'insertion")?;
    Ok(changed > 0)
}

/// Supprime tous les tirages d'une date. Retourne le nombre de lignes supprimées.
pub fn delete_draws_on(conn: &Connection, date: &str) -> Result<usize> {
    let removed = conn
        .execute("DELETE FROM draws WHERE date = ?1", [date])
        .context("Échec de la suppression")?;
    Ok(removed)
}

/// Tous les tirages, du plus ancien au plus récent.
pub fn fetch_all_draws(conn: &Connection) -> Result<Vec<DrawRecord>> {
    let mut stmt = conn.prepare(
        "SELECT date, n1, n2, n3, n4, n5, n6, bonus FROM draws ORDER BY date ASC, rowid ASC"
    )?;
    let mut draws = stmt.query_map([], |row| {
        Ok(DrawRecord {
            date: row.get(0)?,
            numbers: [
                row.get::<_, u8>(1)?,
                row.get::<_, u8>(2)?,
                row.get::<_, u8>(3)?,
                row.get::<_, u8>(4)?,
                row.get::<_, u8>(5)?,
                row.get::<_, u8>(6)?,
            ],
            bonus: row.get(7)?,
        })
    })?.collect::<Result<Vec<_>, _>>()?;
    sort_chronological(&mut draws);
    Ok(draws)
}

/// Les `limit` derniers tirages, le plus récent en premier.
pub fn fetch_last_draws(conn: &Connection, limit: u32) -> Result<Vec<DrawRecord>> {
    let mut draws = fetch_all_draws(conn)?;
    draws.reverse();
    draws.truncate(limit as usize);
    Ok(draws)
}

pub fn count_draws(conn: &Connection) -> Result<u32> {
    let count: u32 = conn.query_row("SELECT COUNT(*) FROM draws", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_draw(date: &str, first: u8) -> DrawRecord {
        DrawRecord::new(date, [first, 10, 20, 30, 40, 49], 0).unwrap()
    }

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_count() {
        let conn = memory_db();
        assert_eq!(count_draws(&conn).unwrap(), 0);

        insert_draw(&conn, &test_draw("2024-01-01", 1)).unwrap();
        assert_eq!(count_draws(&conn).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_ignored() {
        let conn = memory_db();

        let inserted = insert_draw(&conn, &test_draw("2024-01-01", 1)).unwrap();
        assert!(inserted);
        let inserted = insert_draw(&conn, &test_draw("2024-01-01", 1)).unwrap();
        assert!(!inserted);
        assert_eq!(count_draws(&conn).unwrap(), 1);
    }

    #[test]
    fn test_fetch_order() {
        let conn = memory_db();

        insert_draw(&conn, &test_draw("2024-01-01", 1)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-05", 2)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-03", 3)).unwrap();

        let all = fetch_all_draws(&conn).unwrap();
        assert_eq!(all[0].date, "2024-01-01");
        assert_eq!(all[2].date, "2024-01-05");

        let last = fetch_last_draws(&conn, 2).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].date, "2024-01-05");
        assert_eq!(last[1].date, "2024-01-03");
    }

    #[test]
    fn test_delete_by_date() {
        let conn = memory_db();
        insert_draw(&conn, &test_draw("2024-01-01", 1)).unwrap();
        insert_draw(&conn, &test_draw("2024-01-02", 2)).unwrap();

        assert_eq!(delete_draws_on(&conn, "2024-01-01").unwrap(), 1);
        assert_eq!(delete_draws_on(&conn, "2024-01-01").unwrap(), 0);
        assert_eq!(count_draws(&conn).unwrap(), 1);
    }
}
