use crate::scoring::NumberScore;

use super::{Method, PredictedSet};

const TOP_CANDIDATES: usize = 10;
const MEMBERSHIP_SHARE: f64 = 0.7;
const PRIOR_SHARE: f64 = 0.3;

fn method_boost(method: Method) -> f64 {
    match method {
        Method::Consensus => 1.2,
        Method::MarkovFlow | Method::ChainMaster => 1.15,
        Method::MonteCarlo | Method::Genetic => 1.1,
        Method::HistoricalEcho => 1.05,
        _ => 1.0,
    }
}

/// Grille unique évaluée par le backtest : appartenance pondérée par rang aux 10 meilleures
/// candidates, mélangée à un a priori composite/transition/triplet.
pub fn select_sequence_focused_top_set(sets: &[PredictedSet], scores: &[NumberScore]) -> [u8; 6] {
    let pool = scores.iter().map(|s| s.number as usize).max().unwrap_or(0);
    let mut membership = vec![0.0f64; pool + 1];
    for (rank, set) in sets.iter().take(TOP_CANDIDATES).enumerate() {
        let w = set.relative_lift.clamp(0.35, 1.75) * method_boost(set.method) / (rank + 1) as f64;
        for &n in &set.numbers {
            if let Some(slot) = membership.get_mut(n as usize) {
                *slot += w;
            }
        }
    }
    let max_membership = membership.iter().copied().fold(0.0, f64::max);
    let max_composite = scores.iter().map(|s| s.composite_score).fold(0.0, f64::max);

    let mut ranked: Vec<(u8, f64)> = scores
        .iter()
        .map(|s| {
            let member = if max_membership > 0.0 { membership[s.number as usize] / max_membership } else { 0.0 };
            let composite = if max_composite > 0.0 { s.composite_score / max_composite } else { 0.0 };
            let prior = 0.6 * composite + 0.25 * s.transition + 0.15 * s.triple_affinity;
            (s.number, MEMBERSHIP_SHARE * member + PRIOR_SHARE * prior)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut out = [0u8; 6];
    for (slot, (n, _)) in out.iter_mut().zip(&ranked) {
        *slot = *n;
    }
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::run_full_diagnostics;
    use crate::profiles::preset_profiles;
    use crate::scoring::composite_scoring;
    use lotto_db::models::make_test_draws;

    fn set(numbers: [u8; 6], lift: f64, method: Method) -> PredictedSet {
        PredictedSet { numbers, total_score: lift * 10.0, group_breakdown: [0; 4], relative_lift: lift, method }
    }

    #[test]
    fn test_unanimous_candidates_win() {
        let draws = make_test_draws(80, 49, 5);
        let diag = run_full_diagnostics(&draws);
        let scores = composite_scoring(&diag, &draws, &preset_profiles()[0]).unwrap();
        let sets: Vec<PredictedSet> = (0..5).map(|_| set([40, 41, 42, 43, 44, 45], 1.0, Method::Consensus)).collect();
        assert_eq!(select_sequence_focused_top_set(&sets, &scores), [40, 41, 42, 43, 44, 45]);
    }

    #[test]
    fn test_without_candidates_uses_prior() {
        let draws = make_test_draws(80, 49, 5);
        let diag = run_full_diagnostics(&draws);
        let scores = composite_scoring(&diag, &draws, &preset_profiles()[0]).unwrap();
        let picked = select_sequence_focused_top_set(&[], &scores);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert!(picked.iter().all(|&n| (1..=49).contains(&n)));
    }
}
