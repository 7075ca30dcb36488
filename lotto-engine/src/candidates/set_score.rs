use std::collections::{HashMap, HashSet};

use crate::diagnostics::frequency::{group_counts, pattern_key};
use crate::diagnostics::relations::{combo_key, for_each_subset};
use crate::diagnostics::FullDiagnostics;
use crate::scoring::NumberScore;

const IDEAL_PER_BUCKET: f64 = 1.5;
const MAX_GROUP_DEVIATION: f64 = 9.0;
const PATTERN_WEIGHT: f64 = 3.0;
const RELATION_BASE: f64 = 1.5;
const TRANSITION_FLOOR: f64 = 0.4;
const CHAIN_BONUS: f64 = 1.5;
const RARE_DELTA: f64 = 0.01;
const RARE_DELTA_PENALTY: f64 = 0.3;

/// Évaluateur de grilles partagé par toutes les heuristiques. Les scores sont mémorisés par
/// 6-uplet trié.
pub struct SetScorer<'a> {
    diagnostics: &'a FullDiagnostics,
    composite: Vec<f64>,
    transition: Vec<f64>,
    relations: HashMap<u64, usize>,
    chain: HashSet<(u8, u8)>,
    memo: HashMap<[u8; 6], f64>,
}

impl<'a> SetScorer<'a> {
    pub fn new(diagnostics: &'a FullDiagnostics, scores: &[NumberScore]) -> Self {
        let n = diagnostics.pool_size;
        let mut composite = vec![0.0; n + 1];
        let mut transition = vec![0.0; n + 1];
        for s in scores {
            if let (Some(c), Some(t)) = (composite.get_mut(s.number as usize), transition.get_mut(s.number as usize)) {
                *c = s.composite_score;
                *t = s.transition;
            }
        }

        let relations = diagnostics
            .triples
            .iter()
            .chain(&diagnostics.quadruples)
            .chain(&diagnostics.quintuples)
            .map(|c| (combo_key(&c.numbers), c.numbers.len()))
            .collect();

        let mut chain = HashSet::new();
        if let Some(lag1) = diagnostics.lag1() {
            for a in 1..=n as u8 {
                for b in lag1.confident_successors(a) {
                    if a != b {
                        chain.insert((a.min(b), a.max(b)));
                    }
                }
            }
        }

        Self { diagnostics, composite, transition, relations, chain, memo: HashMap::new() }
    }

    pub fn composite(&self, n: u8) -> f64 {
        self.composite.get(n as usize).copied().unwrap_or(0.0)
    }

    pub fn is_chain_pair(&self, a: u8, b: u8) -> bool {
        self.chain.contains(&(a.min(b), a.max(b)))
    }

    pub fn score(&mut self, numbers: &[u8; 6]) -> f64 {
        if let Some(&s) = self.memo.get(numbers) {
            return s;
        }
        let s = self.evaluate(numbers);
        self.memo.insert(*numbers, s);
        s
    }

    fn evaluate(&self, numbers: &[u8; 6]) -> f64 {
        let d = self.diagnostics;
        let base: f64 = numbers.iter().map(|&n| self.composite(n)).sum();

        let groups = group_counts(numbers, d.pool_size);
        let deviation: f64 = groups.iter().map(|&c| (c as f64 - IDEAL_PER_BUCKET).abs()).sum();
        let group_bonus = (1.0 - deviation / MAX_GROUP_DEVIATION).max(0.0);

        let pattern_bonus = if d.draw_count > 0 {
            d.pattern_frequency(&pattern_key(&groups)) as f64 / d.draw_count as f64 * PATTERN_WEIGHT
        } else {
            0.0
        };

        let mut relation_bonus = 0.0;
        let mut covered: HashSet<u8> = HashSet::new();
        for k in 3..=5 {
            for_each_subset(numbers, k, |c| {
                if self.relations.contains_key(&combo_key(c)) {
                    relation_bonus += RELATION_BASE.powi(k as i32);
                    covered.extend(c.iter().copied());
                }
            });
        }
        let density_bonus = match covered.len() {
            5.. => 5.0,
            4 => 3.0,
            3 => 2.0,
            _ => 0.0,
        };

        let transition_bonus: f64 = numbers
            .iter()
            .map(|&n| self.transition.get(n as usize).copied().unwrap_or(0.0))
            .filter(|&t| t > TRANSITION_FLOOR)
            .map(|t| t * t)
            .sum();

        let mut chain_bonus = 0.0;
        for_each_subset(numbers, 2, |p| {
            if self.is_chain_pair(p[0], p[1]) {
                chain_bonus += CHAIN_BONUS;
            }
        });

        let delta_penalty = numbers
            .windows(2)
            .filter(|w| {
                let delta = (w[1] - w[0]) as usize;
                d.delta_frequency.get(delta).copied().unwrap_or(0.0) < RARE_DELTA
            })
            .count() as f64
            * RARE_DELTA_PENALTY;

        base + group_bonus + pattern_bonus + relation_bonus + density_bonus + transition_bonus + chain_bonus
            - delta_penalty
            - 2.0 * balance_penalty(numbers, d.sum_band)
    }
}

/// Pénalité d'équilibre : parité extrême, somme hors plage, numéros consécutifs en excès.
pub fn balance_penalty(numbers: &[u8; 6], sum_band: (f64, f64)) -> f64 {
    let odd = numbers.iter().filter(|&&n| n % 2 == 1).count();
    let mut penalty = match odd {
        0 | 6 => 1.0,
        1 | 5 => 0.3,
        _ => 0.0,
    };
    let sum: f64 = numbers.iter().map(|&n| n as f64).sum();
    if sum < sum_band.0 || sum > sum_band.1 {
        penalty += 0.5;
    }
    let consecutive = numbers.windows(2).filter(|w| w[1] == w[0] + 1).count();
    if consecutive >= 3 {
        penalty += 0.5 * (consecutive - 2) as f64;
    }
    penalty
}

pub fn odd_even_extreme(numbers: &[u8]) -> bool {
    let odd = numbers.iter().filter(|&&n| n % 2 == 1).count();
    odd == 0 || odd == numbers.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::run_full_diagnostics;
    use crate::profiles::preset_profiles;
    use crate::scoring::composite_scoring;
    use lotto_db::models::make_test_draws;

    #[test]
    fn test_balance_penalty() {
        let band = (0.0, 1000.0);
        assert_eq!(balance_penalty(&[2, 4, 6, 8, 10, 12], band), 1.0);
        assert_eq!(balance_penalty(&[1, 4, 6, 8, 10, 12], band), 0.3);
        assert_eq!(balance_penalty(&[1, 4, 7, 10, 13, 20], band), 0.0);
        // 5 paires consécutives, parité 3/3
        assert_eq!(balance_penalty(&[1, 2, 3, 4, 5, 6], band), 1.5);
        assert_eq!(balance_penalty(&[1, 4, 7, 10, 13, 20], (100.0, 200.0)), 0.5);
    }

    #[test]
    fn test_score_memoized_and_finite() {
        let draws = make_test_draws(120, 49, 6);
        let diag = run_full_diagnostics(&draws);
        let scores = composite_scoring(&diag, &draws, &preset_profiles()[0]).unwrap();
        let mut scorer = SetScorer::new(&diag, &scores);
        let set = [3, 11, 19, 27, 35, 43];
        let a = scorer.score(&set);
        let b = scorer.score(&set);
        assert!(a.is_finite());
        assert_eq!(a, b);
    }

    #[test]
    fn test_known_relation_rewarded() {
        let draws = make_test_draws(200, 49, 12);
        let diag = run_full_diagnostics(&draws);
        let scores = composite_scoring(&diag, &draws, &preset_profiles()[0]).unwrap();
        let mut scorer = SetScorer::new(&diag, &scores);
        let triple = &diag.triples[0].numbers;
        let fillers: Vec<u8> = (1..=49u8).filter(|n| !triple.contains(n)).collect();
        let mut with_triple: Vec<u8> = triple.clone();
        with_triple.extend(&fillers[..3]);
        with_triple.sort();
        let with_triple: [u8; 6] = with_triple.try_into().unwrap();
        let relation_part = scorer.score(&with_triple) - scorer.evaluate_without_relations(&with_triple);
        assert!(relation_part >= RELATION_BASE.powi(3));
    }

    impl SetScorer<'_> {
        fn evaluate_without_relations(&self, numbers: &[u8; 6]) -> f64 {
            let stripped = SetScorer {
                diagnostics: self.diagnostics,
                composite: self.composite.clone(),
                transition: self.transition.clone(),
                relations: HashMap::new(),
                chain: self.chain.clone(),
                memo: HashMap::new(),
            };
            stripped.evaluate(numbers)
        }
    }
}
