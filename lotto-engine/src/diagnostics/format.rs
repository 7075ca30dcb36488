use serde::{Deserialize, Serialize};

use lotto_db::models::{DrawRecord, PoolFormat};

/// Format retenu quand l'historique est vide.
pub const DEFAULT_POOL: usize = 52;

/// Suite contiguë de tirages partageant le même plafond déduit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatEra {
    pub pool_size: usize,
    pub start_index: usize,
    /// Inclusif.
    pub end_index: usize,
    pub draw_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDetection {
    pub current_n: usize,
    pub current_draws: Vec<DrawRecord>,
    pub eras: Vec<FormatEra>,
}

/// Découpe l'historique chronologique en ères. Seule une hausse du plafond ouvre une
/// nouvelle ère : un tirage « petit » dans une ère 58 y reste.
pub fn detect_format(draws: &[DrawRecord]) -> FormatDetection {
    if draws.is_empty() {
        return FormatDetection { current_n: DEFAULT_POOL, current_draws: Vec::new(), eras: Vec::new() };
    }

    let mut eras = Vec::new();
    let mut current = draws[0].format();
    let mut start = 0usize;

    for (i, draw) in draws.iter().enumerate().skip(1) {
        let format = draw.format();
        if format > current {
            eras.push(era(current, start, i - 1));
            current = format;
            start = i;
        }
    }
    eras.push(era(current, start, draws.len() - 1));

    FormatDetection {
        current_n: current.size(),
        current_draws: draws[start..].to_vec(),
        eras,
    }
}

fn era(format: PoolFormat, start: usize, end: usize) -> FormatEra {
    FormatEra {
        pool_size: format.size(),
        start_index: start,
        end_index: end,
        draw_count: end - start + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(date: &str, numbers: [u8; 6]) -> DrawRecord {
        DrawRecord::new(date, numbers, 0).unwrap()
    }

    #[test]
    fn test_empty_history() {
        let f = detect_format(&[]);
        assert_eq!(f.current_n, 52);
        assert!(f.current_draws.is_empty());
        assert!(f.eras.is_empty());
    }

    #[test]
    fn test_single_era() {
        let draws = vec![
            draw("2020-01-01", [1, 2, 3, 4, 5, 49]),
            draw("2020-01-04", [7, 8, 9, 10, 11, 12]),
        ];
        let f = detect_format(&draws);
        assert_eq!(f.current_n, 49);
        assert_eq!(f.eras.len(), 1);
        assert_eq!(f.eras[0].draw_count, 2);
        assert_eq!(f.current_draws.len(), 2);
    }

    #[test]
    fn test_era_split_49_to_58() {
        let draws = vec![
            draw("2020-01-01", [1, 2, 3, 4, 5, 49]),
            draw("2020-01-04", [6, 7, 8, 9, 10, 40]),
            draw("2020-01-08", [11, 12, 13, 14, 15, 30]),
            draw("2020-01-11", [1, 20, 30, 40, 50, 58]),
            draw("2020-01-15", [2, 3, 4, 5, 6, 7]),
        ];
        let f = detect_format(&draws);
        assert_eq!(f.eras.len(), 2);
        assert_eq!(f.eras[0], FormatEra { pool_size: 49, start_index: 0, end_index: 2, draw_count: 3 });
        assert_eq!(f.eras[1], FormatEra { pool_size: 58, start_index: 3, end_index: 4, draw_count: 2 });
        assert_eq!(f.current_n, 58);
        assert_eq!(f.current_draws.len(), 2);
    }

    #[test]
    fn test_decrease_never_opens_era() {
        let draws = vec![
            draw("2020-01-01", [1, 2, 3, 4, 5, 52]),
            draw("2020-01-04", [1, 2, 3, 4, 5, 20]),
            draw("2020-01-08", [1, 2, 3, 4, 5, 51]),
        ];
        let f = detect_format(&draws);
        assert_eq!(f.eras.len(), 1);
        assert_eq!(f.current_n, 52);
    }
}
