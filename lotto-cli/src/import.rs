use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use lotto_db::rusqlite::Connection;
use std::path::Path;

use lotto_db::db::insert_draw;
use lotto_db::models::{DrawRecord, PICK_COUNT};

/// Date ISO ou française, normalisée en `AAAA-MM-JJ`.
pub fn parse_date(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .with_context(|| format!("Format de date invalide: '{}'", raw))?;
    Ok(date.format("%Y-%m-%d").to_string())
}

/// `;` si la première ligne en contient plus que de `,`.
pub fn detect_delimiter(first_line: &str) -> u8 {
    let semicolons = first_line.matches(';').count();
    let commas = first_line.matches(',').count();
    if semicolons >= commas && semicolons > 0 {
        b';'
    } else {
        b','
    }
}

fn parse_record(record: &csv::StringRecord) -> Result<DrawRecord> {
    let get = |idx: usize| -> Result<&str> {
        record
            .get(idx)
            .map(str::trim)
            .with_context(|| format!("Champ manquant à l'index {}", idx))
    };
    let get_u8 = |idx: usize| -> Result<u8> {
        let s = get(idx)?;
        s.parse::<u8>()
            .with_context(|| format!("Impossible de parser '{}' (index {})", s, idx))
    };

    let date = parse_date(get(0)?)?;
    let mut numbers = [0u8; PICK_COUNT];
    for (i, slot) in numbers.iter_mut().enumerate() {
        *slot = get_u8(i + 1)?;
    }
    let bonus = match record.get(PICK_COUNT + 1).map(str::trim) {
        Some(s) if !s.is_empty() => get_u8(PICK_COUNT + 1)?,
        _ => 0,
    };
    DrawRecord::new(date, numbers, bonus)
}

pub struct ImportResult {
    pub total_records: u32,
    pub inserted: u32,
    pub skipped: u32,
    pub errors: u32,
}

pub fn import_csv(conn: &Connection, path: &Path) -> Result<ImportResult> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible d'ouvrir {:?}", path))?;
    import_str(conn, &content)
}

pub fn import_str(conn: &Connection, content: &str) -> Result<ImportResult> {
    let Some(first_line) = content.lines().find(|l| !l.trim().is_empty()) else {
        bail!("Fichier vide");
    };
    // une première ligne sans date lisible est un en-tête
    let delimiter = detect_delimiter(first_line);
    let has_header = first_line
        .split(delimiter as char)
        .next()
        .map_or(true, |field| parse_date(field).is_err());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_header)
        .flexible(true)
        .from_reader(content.as_bytes());

    let tx = conn.unchecked_transaction()
        .context("Impossible de démarrer la transaction")?;

    let mut result = ImportResult {
        total_records: 0,
        inserted: 0,
        skipped: 0,
        errors: 0,
    };

    for record_result in reader.records() {
        result.total_records += 1;
        match record_result {
            Ok(record) => match parse_record(&record) {
                Ok(draw) => match insert_draw(&tx, &draw) {
                    Ok(true) => result.inserted += 1,
                    Ok(false) => result.skipped += 1,
                    Err(e) => {
                        log::warn!("Erreur insertion tirage {}: {}", result.total_records, e);
                        result.errors += 1;
                    }
                },
                Err(e) => {
                    log::warn!("Ligne {} ignorée: {}", result.total_records, e);
                    result.errors += 1;
                }
            },
            Err(e) => {
                log::warn!("Erreur lecture ligne {}: {}", result.total_records, e);
                result.errors += 1;
            }
        }
    }

    tx.commit().context("Échec du commit")?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotto_db::db::{count_draws, fetch_all_draws, migrate};

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("17/02/2026").unwrap(), "2026-02-17");
        assert_eq!(parse_date("2020-01-01").unwrap(), "2020-01-01");
        assert!(parse_date("31/02/2020").is_err());
        assert!(parse_date("date").is_err());
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("date;n1;n2"), b';');
        assert_eq!(detect_delimiter("date,n1,n2"), b',');
        assert_eq!(detect_delimiter("2024-01-01"), b',');
    }

    #[test]
    fn test_import_with_header_and_invalid_rows() {
        let conn = memory_db();
        let csv = "date;n1;n2;n3;n4;n5;n6;bonus\n\
                   03/01/2024;5;12;19;27;33;41;8\n\
                   06/01/2024;1;2;3;4;5;5;9\n\
                   10/01/2024;7;14;21;28;35;42;\n\
                   03/01/2024;5;12;19;27;33;41;8\n";
        let result = import_str(&conn, csv).unwrap();
        assert_eq!(result.total_records, 4);
        assert_eq!(result.inserted, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.errors, 1);

        let draws = fetch_all_draws(&conn).unwrap();
        assert_eq!(draws[0].date, "2024-01-03");
        assert_eq!(draws[1].bonus, 0);
    }

    #[test]
    fn test_import_comma_without_header() {
        let conn = memory_db();
        let csv = "2024-01-03,5,12,19,27,33,52,8\n2024-01-06,1,2,3,4,5,6,0\n";
        let result = import_str(&conn, csv).unwrap();
        assert_eq!(result.inserted, 2);
        assert_eq!(count_draws(&conn).unwrap(), 2);
    }

    #[test]
    fn test_empty_file_rejected() {
        let conn = memory_db();
        assert!(import_str(&conn, "\n\n").is_err());
    }
}
