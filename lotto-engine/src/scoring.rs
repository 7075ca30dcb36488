use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use lotto_db::models::DrawRecord;

use crate::diagnostics::{EntropyRegime, FullDiagnostics};
use crate::profiles::{Factor, FactorWeights, WeightProfile};

/// Décroissance exponentielle par tirage d'ancienneté.
pub const BAYES_DECAY: f64 = 0.005;
/// Prior de Dirichlet symétrique.
pub const BAYES_ALPHA0: f64 = 1.0;
const NOISE_FLOOR: f64 = 0.05;
const POSITIONAL_DIVISOR: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberScore {
    pub number: u8,
    pub bayesian: f64,
    pub hot_cold: f64,
    pub gap: f64,
    pub pair_affinity: f64,
    pub triple_affinity: f64,
    pub positional: f64,
    pub transition: f64,
    pub repeat: f64,
    pub composite_score: f64,
}

impl NumberScore {
    pub fn factor(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Bayesian => self.bayesian,
            Factor::HotCold => self.hot_cold,
            Factor::Gap => self.gap,
            Factor::Pair => self.pair_affinity,
            Factor::Triple => self.triple_affinity,
            Factor::Positional => self.positional,
            Factor::Transition => self.transition,
            Factor::Repeat => self.repeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BayesianEstimate {
    pub number: u8,
    pub weighted_count: f64,
    pub posterior: f64,
}

/// Tirages de l'historique compatibles avec le format courant.
fn format_history<'a>(draws: &'a [DrawRecord], pool_size: usize) -> Vec<&'a DrawRecord> {
    draws.iter().filter(|d| d.max_value() as usize <= pool_size).collect()
}

/// Comptes pondérés par récence et postérieur lissé (Dirichlet α₀), par numéro croissant.
pub fn bayesian_smoothed(draws: &[DrawRecord], pool_size: usize) -> Vec<BayesianEstimate> {
    let history = format_history(draws, pool_size);
    let t = history.len();
    let mut weighted = vec![0.0f64; pool_size + 1];
    let mut mass = 0.0;
    for (i, draw) in history.iter().enumerate() {
        let age = (t - 1 - i) as f64;
        let w = (-BAYES_DECAY * age).exp();
        for &n in &draw.numbers {
            weighted[n as usize] += w;
            mass += w;
        }
    }
    let denom = mass + BAYES_ALPHA0 * pool_size as f64;
    (1..=pool_size)
        .map(|n| BayesianEstimate {
            number: n as u8,
            weighted_count: weighted[n],
            posterior: (weighted[n] + BAYES_ALPHA0) / denom,
        })
        .collect()
}

fn min_max(values: &mut [f64]) {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;
    for v in values.iter_mut() {
        *v = if span > 0.0 { (*v - lo) / span } else { 0.0 };
    }
}

fn scale_band(factor: Factor) -> (f64, f64) {
    match factor {
        Factor::Pair | Factor::Triple => (0.55, 1.55),
        Factor::Transition => (0.55, 1.5),
        Factor::HotCold => (0.7, 1.4),
        Factor::Bayesian => (0.75, 1.35),
        Factor::Positional => (0.75, 1.3),
        Factor::Gap | Factor::Repeat => (0.8, 1.2),
    }
}

fn regime_shift(regime: EntropyRegime, factor: Factor) -> f64 {
    match (regime, factor) {
        (EntropyRegime::Structured, Factor::Pair) => 0.35,
        (EntropyRegime::Structured, Factor::Triple | Factor::Transition) => 0.3,
        (EntropyRegime::Structured, Factor::HotCold) => 0.2,
        (EntropyRegime::Structured, Factor::Bayesian | Factor::Positional) => -0.1,
        (EntropyRegime::Diffuse, Factor::Pair | Factor::Triple) => -0.3,
        (EntropyRegime::Diffuse, Factor::Transition) => -0.25,
        (EntropyRegime::Diffuse, Factor::HotCold) => -0.1,
        (EntropyRegime::Diffuse, Factor::Bayesian | Factor::Positional) => 0.2,
        _ => 0.0,
    }
}

/// Multiplicateur par facteur selon le régime d'entropie, borné par facteur.
pub fn adaptive_scale(diagnostics: &FullDiagnostics) -> FactorWeights {
    let entropy = &diagnostics.entropy;
    // la concentration accentue un régime structuré
    let intensity = match entropy.regime {
        EntropyRegime::Structured => 1.0 + entropy.concentration,
        _ => 1.0,
    };
    let mut scale = FactorWeights::default();
    for f in Factor::ALL {
        let (lo, hi) = scale_band(f);
        scale.set(f, (1.0 + intensity * regime_shift(entropy.regime, f)).clamp(lo, hi));
    }
    scale
}

/// Score composite par numéro, trié par score décroissant (égalité : plus petit numéro d'abord).
pub fn composite_scoring(
    diagnostics: &FullDiagnostics,
    draws: &[DrawRecord],
    profile: &WeightProfile,
) -> Result<Vec<NumberScore>> {
    let n = diagnostics.pool_size;
    let history = format_history(draws, n);

    let mut bayesian: Vec<f64> = bayesian_smoothed(draws, n).iter().map(|b| b.posterior).collect();
    min_max(&mut bayesian);

    let mut pair = vec![0.0f64; n];
    for p in &diagnostics.pairs {
        if p.z_score > 0.0 {
            for x in [p.a, p.b] {
                if let Some(slot) = pair.get_mut(x as usize - 1) {
                    *slot += p.z_score;
                }
            }
        }
    }
    min_max(&mut pair);

    let mut triple = vec![0.0f64; n];
    for t in &diagnostics.triples {
        for &x in &t.numbers {
            if let Some(slot) = triple.get_mut(x as usize - 1) {
                *slot += t.count as f64;
            }
        }
    }
    min_max(&mut triple);

    let mut transition = vec![0.0f64; n];
    for table in &diagnostics.transitions {
        let Some(prior) = history.len().checked_sub(table.lag).and_then(|i| history.get(i)) else {
            continue;
        };
        let decay = 0.5f64.powi(table.lag as i32 - 1);
        for (i, slot) in transition.iter_mut().enumerate() {
            let b = (i + 1) as u8;
            *slot += prior
                .numbers
                .iter()
                .map(|&a| table.probability(a, b).powi(2))
                .sum::<f64>()
                * decay;
        }
    }
    min_max(&mut transition);

    let last = history.last();
    let scale = adaptive_scale(diagnostics);
    let weights = &profile.weights;

    let mut scores = Vec::with_capacity(n);
    for i in 0..n {
        let number = (i + 1) as u8;
        let hot_cold = diagnostics
            .hot_cold_of(number)
            .map_or(0.5, |h| ((h.z_delta + 3.0) / 6.0).clamp(0.0, 1.0));
        let gap = diagnostics.gap(number).map_or(0.0, |g| (g.ratio() / 3.0).min(1.0));
        let positional = (diagnostics.positional.column(number as usize).sum() / POSITIONAL_DIVISOR).min(1.0);
        let repeat = if last.is_some_and(|d| d.contains(number)) { 1.0 } else { 0.0 };

        let mut score = NumberScore {
            number,
            bayesian: bayesian[i],
            hot_cold,
            gap,
            pair_affinity: pair[i],
            triple_affinity: triple[i],
            positional,
            transition: transition[i],
            repeat,
            composite_score: 0.0,
        };
        score.composite_score = Factor::ALL
            .iter()
            .map(|&f| {
                let sub = score.factor(f);
                let floored = if f.noise_floored() { (sub - NOISE_FLOOR).max(0.0) } else { sub.max(0.0) };
                weights.get(f) * scale.get(f) * floored
            })
            .sum();
        if !score.composite_score.is_finite() {
            bail!("Score composite non fini pour le numéro {number} (profil {})", profile.name);
        }
        scores.push(score);
    }

    sort_scores(&mut scores);
    Ok(scores)
}

pub fn sort_scores(scores: &mut [NumberScore]) {
    scores.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score).then(a.number.cmp(&b.number)));
}

/// Moyenne pondérée des scores composites de plusieurs profils. Les sous-scores ne dépendent
/// pas du profil et sont repris du premier jeu.
pub fn blend_scores(parts: &[(f64, &[NumberScore])]) -> Vec<NumberScore> {
    let Some((_, first)) = parts.first() else {
        return Vec::new();
    };
    let total: f64 = parts.iter().map(|(w, _)| w.max(0.0)).sum();
    let mut by_number: Vec<NumberScore> = first.to_vec();
    by_number.sort_by_key(|s| s.number);
    for s in by_number.iter_mut() {
        s.composite_score = 0.0;
    }
    for (w, scores) in parts {
        let share = if total > 0.0 { w.max(0.0) / total } else { 1.0 / parts.len() as f64 };
        for s in scores.iter() {
            if let Some(slot) = by_number.get_mut(s.number as usize - 1) {
                slot.composite_score += share * s.composite_score;
            }
        }
    }
    sort_scores(&mut by_number);
    by_number
}

/// Score composite indexé par numéro (indice 0 inutilisé).
pub fn composite_by_number(scores: &[NumberScore], pool_size: usize) -> Vec<f64> {
    let mut out = vec![0.0; pool_size + 1];
    for s in scores {
        if let Some(slot) = out.get_mut(s.number as usize) {
            *slot = s.composite_score;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::run_full_diagnostics;
    use crate::profiles::preset_profiles;
    use lotto_db::models::make_test_draws;

    #[test]
    fn test_scores_sorted_and_complete() {
        let draws = make_test_draws(80, 52, 0x7f4a7c15);
        let diag = run_full_diagnostics(&draws);
        for profile in preset_profiles() {
            let scores = composite_scoring(&diag, &draws, &profile).unwrap();
            assert_eq!(scores.len(), 52);
            assert!(scores.windows(2).all(|w| w[0].composite_score >= w[1].composite_score));
            assert!(scores.iter().all(|s| s.composite_score.is_finite() && s.composite_score >= 0.0));
        }
    }

    #[test]
    fn test_bayesian_recency() {
        let draws = vec![
            DrawRecord::new("2024-01-01", [1, 2, 3, 4, 5, 6], 0).unwrap(),
            DrawRecord::new("2024-01-04", [10, 11, 12, 13, 14, 15], 0).unwrap(),
            DrawRecord::new("2024-01-08", [20, 21, 22, 23, 24, 25], 0).unwrap(),
        ];
        let b = bayesian_smoothed(&draws, 49);
        assert!(b[19].weighted_count > b[0].weighted_count);
        assert!(b[19].posterior > b[0].posterior);
        assert_eq!(b[40].weighted_count, 0.0);
        let total: f64 = b.iter().map(|e| e.posterior).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_repeat_factor_follows_last_draw() {
        let draws = make_test_draws(60, 49, 2);
        let diag = run_full_diagnostics(&draws);
        let scores = composite_scoring(&diag, &draws, &preset_profiles()[0]).unwrap();
        let last = &draws[59];
        for s in &scores {
            assert_eq!(s.repeat == 1.0, last.contains(s.number));
        }
    }

    #[test]
    fn test_adaptive_scale_within_bands() {
        let draws = make_test_draws(100, 49, 8);
        let mut diag = run_full_diagnostics(&draws);
        for regime in [EntropyRegime::Structured, EntropyRegime::Diffuse, EntropyRegime::Neutral] {
            diag.entropy.regime = regime;
            diag.entropy.concentration = 0.9;
            let scale = adaptive_scale(&diag);
            for f in Factor::ALL {
                let (lo, hi) = scale_band(f);
                assert!(scale.get(f) >= lo && scale.get(f) <= hi);
            }
        }
        diag.entropy.regime = EntropyRegime::Structured;
        assert!(adaptive_scale(&diag).pair > 1.0);
        diag.entropy.regime = EntropyRegime::Diffuse;
        assert!(adaptive_scale(&diag).pair < 1.0);
        assert!(adaptive_scale(&diag).bayesian > 1.0);
    }

    #[test]
    fn test_blend_scores_weighted() {
        let draws = make_test_draws(60, 49, 3);
        let diag = run_full_diagnostics(&draws);
        let presets = preset_profiles();
        let a = composite_scoring(&diag, &draws, &presets[0]).unwrap();
        let b = composite_scoring(&diag, &draws, &presets[4]).unwrap();
        let blended = blend_scores(&[(1.0, &a[..]), (3.0, &b[..])]);
        assert_eq!(blended.len(), 49);
        let ca = composite_by_number(&a, 49);
        let cb = composite_by_number(&b, 49);
        for s in &blended {
            let n = s.number as usize;
            assert!((s.composite_score - (0.25 * ca[n] + 0.75 * cb[n])).abs() < 1e-12);
        }
        assert!(blended.windows(2).all(|w| w[0].composite_score >= w[1].composite_score));
    }
}
