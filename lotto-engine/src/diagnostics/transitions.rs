use ndarray::{Array1, Array2};

use lotto_db::models::DrawRecord;

pub const MAX_LAG: usize = 4;
const CHAIN_MIN_SUPPORT: f64 = 2.0;
const CHAIN_RELATIVE_FLOOR: f64 = 0.75;
const CHAIN_TOP: usize = 3;

/// Transitions « a tiré au temps t−lag, b tiré au temps t ».
#[derive(Debug, Clone)]
pub struct TransitionTable {
    pub lag: usize,
    /// Indexé par numéro (ligne 0 et colonne 0 inutilisées).
    pub counts: Array2<f64>,
    pub from_totals: Array1<f64>,
}

impl TransitionTable {
    pub fn build(draws: &[DrawRecord], pool_size: usize, lag: usize) -> Self {
        let mut counts = Array2::<f64>::zeros((pool_size + 1, pool_size + 1));
        let mut from_totals = Array1::<f64>::zeros(pool_size + 1);
        for t in lag..draws.len() {
            let prev = &draws[t - lag];
            let next = &draws[t];
            for &a in &prev.numbers {
                let a = a as usize;
                if a > pool_size {
                    continue;
                }
                from_totals[a] += 1.0;
                for &b in &next.numbers {
                    if (b as usize) <= pool_size {
                        counts[[a, b as usize]] += 1.0;
                    }
                }
            }
        }
        Self { lag, counts, from_totals }
    }

    pub fn pool_size(&self) -> usize {
        self.from_totals.len().saturating_sub(1)
    }

    pub fn support(&self, a: u8, b: u8) -> f64 {
        self.counts.get([a as usize, b as usize]).copied().unwrap_or(0.0)
    }

    pub fn probability(&self, a: u8, b: u8) -> f64 {
        let from = self.from_totals.get(a as usize).copied().unwrap_or(0.0);
        if from > 0.0 { self.support(a, b) / from } else { 0.0 }
    }

    /// Successeurs de `a` par probabilité décroissante (égalité : plus petit numéro d'abord).
    pub fn successors(&self, a: u8) -> Vec<(u8, f64)> {
        let mut out: Vec<(u8, f64)> = (1..=self.pool_size() as u8)
            .map(|b| (b, self.probability(a, b)))
            .filter(|&(_, p)| p > 0.0)
            .collect();
        out.sort_by(|x, y| y.1.total_cmp(&x.1).then(x.0.cmp(&y.0)));
        out
    }

    /// Successeurs de confiance : top 3 avec support >= 2 et probabilité >= 75 % du max.
    pub fn confident_successors(&self, a: u8) -> Vec<u8> {
        let ranked = self.successors(a);
        let Some(&(_, best)) = ranked.first() else {
            return Vec::new();
        };
        ranked
            .into_iter()
            .filter(|&(b, p)| self.support(a, b) >= CHAIN_MIN_SUPPORT && p >= CHAIN_RELATIVE_FLOOR * best)
            .take(CHAIN_TOP)
            .map(|(b, _)| b)
            .collect()
    }

    /// Force moyenne de transition vers `b` depuis les numéros de `previous`.
    pub fn inflow(&self, previous: &[u8], b: u8) -> f64 {
        if previous.is_empty() {
            return 0.0;
        }
        previous.iter().map(|&a| self.probability(a, b)).sum::<f64>() / previous.len() as f64
    }
}

/// Tables de lag 1 à 4.
pub fn compute_transitions(draws: &[DrawRecord], pool_size: usize) -> Vec<TransitionTable> {
    (1..=MAX_LAG).map(|lag| TransitionTable::build(draws, pool_size, lag)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(numbers: [u8; 6]) -> DrawRecord {
        DrawRecord::new("2024-01-01", numbers, 0).unwrap()
    }

    #[test]
    fn test_lag1_counts() {
        let draws = vec![
            draw([1, 2, 3, 4, 5, 6]),
            draw([7, 8, 9, 10, 11, 12]),
            draw([1, 2, 3, 4, 5, 6]),
            draw([7, 8, 9, 10, 11, 13]),
        ];
        let tables = compute_transitions(&draws, 49);
        assert_eq!(tables.len(), MAX_LAG);
        let lag1 = &tables[0];
        assert_eq!(lag1.support(1, 7), 2.0);
        assert!((lag1.probability(1, 7) - 1.0).abs() < 1e-12);
        assert!((lag1.probability(1, 12) - 0.5).abs() < 1e-12);
        assert_eq!(lag1.probability(49, 1), 0.0);
        // lag 2 : 1 -> 1
        assert_eq!(tables[1].support(1, 1), 1.0);
        assert_eq!(tables[3].from_totals.sum(), 0.0);
    }

    #[test]
    fn test_confident_successors() {
        let draws = vec![
            draw([1, 2, 3, 4, 5, 6]),
            draw([7, 8, 9, 10, 11, 12]),
            draw([1, 2, 3, 4, 5, 6]),
            draw([7, 8, 9, 10, 11, 13]),
        ];
        let lag1 = TransitionTable::build(&draws, 49, 1);
        // 7..11 : probabilité 1 et support 2 ; 12 et 13 : 0.5 < 0.75
        assert_eq!(lag1.confident_successors(1), vec![7, 8, 9]);
        assert!(lag1.confident_successors(40).is_empty());
    }

    #[test]
    fn test_inflow() {
        let draws = vec![draw([1, 2, 3, 4, 5, 6]), draw([1, 8, 9, 10, 11, 12])];
        let lag1 = TransitionTable::build(&draws, 49, 1);
        assert!((lag1.inflow(&[1, 2], 8) - 1.0).abs() < 1e-12);
        assert_eq!(lag1.inflow(&[], 8), 0.0);
    }
}
