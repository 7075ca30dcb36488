use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Les 8 facteurs du score composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Factor {
    Bayesian,
    HotCold,
    Gap,
    Pair,
    Triple,
    Positional,
    Transition,
    Repeat,
}

impl Factor {
    pub const ALL: [Factor; 8] = [
        Factor::Bayesian,
        Factor::HotCold,
        Factor::Gap,
        Factor::Pair,
        Factor::Triple,
        Factor::Positional,
        Factor::Transition,
        Factor::Repeat,
    ];

    /// Positional et repeat sont déjà >= 0 et ne passent pas par le plancher de bruit.
    pub fn noise_floored(&self) -> bool {
        !matches!(self, Factor::Positional | Factor::Repeat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorWeights {
    pub bayesian: f64,
    pub hot_cold: f64,
    pub gap: f64,
    pub pair: f64,
    pub triple: f64,
    pub positional: f64,
    pub transition: f64,
    pub repeat: f64,
}

impl FactorWeights {
    #[allow(clippy::too_many_arguments)]
    pub const fn new(
        bayesian: f64,
        hot_cold: f64,
        gap: f64,
        pair: f64,
        triple: f64,
        positional: f64,
        transition: f64,
        repeat: f64,
    ) -> Self {
        Self { bayesian, hot_cold, gap, pair, triple, positional, transition, repeat }
    }

    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Bayesian => self.bayesian,
            Factor::HotCold => self.hot_cold,
            Factor::Gap => self.gap,
            Factor::Pair => self.pair,
            Factor::Triple => self.triple,
            Factor::Positional => self.positional,
            Factor::Transition => self.transition,
            Factor::Repeat => self.repeat,
        }
    }

    pub fn set(&mut self, factor: Factor, value: f64) {
        let slot = match factor {
            Factor::Bayesian => &mut self.bayesian,
            Factor::HotCold => &mut self.hot_cold,
            Factor::Gap => &mut self.gap,
            Factor::Pair => &mut self.pair,
            Factor::Triple => &mut self.triple,
            Factor::Positional => &mut self.positional,
            Factor::Transition => &mut self.transition,
            Factor::Repeat => &mut self.repeat,
        };
        *slot = value;
    }

    pub fn total(&self) -> f64 {
        Factor::ALL.iter().map(|&f| self.get(f)).sum()
    }

    pub fn normalized(&self) -> Self {
        let total = self.total();
        if total <= 0.0 || !total.is_finite() {
            let uniform = 1.0 / Factor::ALL.len() as f64;
            let mut out = Self::default();
            for f in Factor::ALL {
                out.set(f, uniform);
            }
            return out;
        }
        let mut out = *self;
        for f in Factor::ALL {
            out.set(f, self.get(f).max(0.0) / total);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub name: String,
    pub weights: FactorWeights,
}

impl WeightProfile {
    pub fn new(name: impl Into<String>, weights: FactorWeights) -> Self {
        Self { name: name.into(), weights }
    }

    pub fn normalized(&self) -> Self {
        Self { name: self.name.clone(), weights: self.weights.normalized() }
    }
}

pub const ENSEMBLE_PROFILE_NAME: &str = "Neural Ensemble";
pub const HYBRID_PROFILE_NAME: &str = "Warm Hybrid";

/// Part du profil chaud dans l'hybridation avec le vainqueur du balayage.
pub const WARM_HYBRID_SHARE: f64 = 0.65;

/// Les 7 profils livrés, poids tels qu'écrits.
pub fn preset_profiles() -> Vec<WeightProfile> {
    vec![
        WeightProfile::new("Balanced", FactorWeights::new(0.18, 0.14, 0.12, 0.14, 0.10, 0.10, 0.14, 0.08)),
        WeightProfile::new("Momentum", FactorWeights::new(0.12, 0.28, 0.05, 0.10, 0.08, 0.07, 0.12, 0.18)),
        WeightProfile::new("Overdue Hunter", FactorWeights::new(0.12, 0.08, 0.34, 0.10, 0.08, 0.10, 0.10, 0.08)),
        WeightProfile::new("Relationship", FactorWeights::new(0.10, 0.08, 0.08, 0.28, 0.24, 0.06, 0.10, 0.06)),
        WeightProfile::new("Markov Flow", FactorWeights::new(0.10, 0.10, 0.06, 0.10, 0.10, 0.08, 0.36, 0.10)),
        WeightProfile::new("Bayesian Core", FactorWeights::new(0.36, 0.12, 0.08, 0.10, 0.06, 0.12, 0.10, 0.06)),
        WeightProfile::new("Positional Drift", FactorWeights::new(0.14, 0.10, 0.10, 0.08, 0.06, 0.32, 0.12, 0.08)),
    ]
}

/// Mélange pondéré de profils, résultat normalisé à somme 1.
pub fn blend_profiles(name: &str, parts: &[(f64, &FactorWeights)]) -> WeightProfile {
    let mut acc = FactorWeights::default();
    let total: f64 = parts.iter().map(|(w, _)| w.max(0.0)).sum();
    for (w, weights) in parts {
        let share = if total > 0.0 { w.max(0.0) / total } else { 1.0 / parts.len().max(1) as f64 };
        for f in Factor::ALL {
            acc.set(f, acc.get(f) + share * weights.get(f));
        }
    }
    WeightProfile::new(name, acc.normalized())
}

/// Profil de démarrage à chaud croisé avec le meilleur preset validé.
pub fn hybridize(warm: &WeightProfile, best: &WeightProfile) -> WeightProfile {
    blend_profiles(
        HYBRID_PROFILE_NAME,
        &[
            (WARM_HYBRID_SHARE, &warm.weights.normalized()),
            (1.0 - WARM_HYBRID_SHARE, &best.weights.normalized()),
        ],
    )
}

/// Récompense superlinéaire d'un recouvrement sur la cible à 7 boules.
pub fn match_utility(overlap: usize) -> f64 {
    let bonus = match overlap {
        6.. => 26.0,
        5 => 11.0,
        4 => 5.0,
        3 => 1.0,
        _ => 0.0,
    };
    overlap as f64 + bonus
}

pub const ROLLING_WINDOW: usize = 50;

/// Performance glissante d'un profil sur les derniers tirages évalués.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePerformance {
    pub name: String,
    overlaps: VecDeque<f64>,
    utilities: VecDeque<f64>,
    pub samples: usize,
}

impl ProfilePerformance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overlaps: VecDeque::with_capacity(ROLLING_WINDOW),
            utilities: VecDeque::with_capacity(ROLLING_WINDOW),
            samples: 0,
        }
    }

    /// Amorce avec un recouvrement moyen connu (état chaud persisté).
    pub fn seeded(name: impl Into<String>, prior_overlap: f64) -> Self {
        let mut perf = Self::new(name);
        let prior = prior_overlap.clamp(0.0, 7.0);
        perf.overlaps.push_back(prior);
        perf.utilities.push_back(match_utility(prior.round() as usize));
        perf
    }

    pub fn record(&mut self, overlap: usize) {
        if self.overlaps.len() == ROLLING_WINDOW {
            self.overlaps.pop_front();
            self.utilities.pop_front();
        }
        self.overlaps.push_back(overlap as f64);
        self.utilities.push_back(match_utility(overlap));
        self.samples += 1;
    }

    pub fn rolling_overlap(&self) -> f64 {
        mean(&self.overlaps)
    }

    pub fn rolling_utility(&self) -> f64 {
        mean(&self.utilities)
    }
}

fn mean(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Indices des profils triés par utilité glissante décroissante (ordre des presets en cas d'égalité).
pub fn rank_by_rolling(perfs: &[ProfilePerformance]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..perfs.len()).collect();
    idx.sort_by(|&a, &b| {
        perfs[b]
            .rolling_utility()
            .partial_cmp(&perfs[a].rolling_utility())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    idx
}

/// Profil d'ensemble : presets pondérés par le carré de leur recouvrement glissant.
pub fn ensemble_profile(presets: &[WeightProfile], perfs: &[ProfilePerformance]) -> WeightProfile {
    let parts: Vec<(f64, &FactorWeights)> = presets
        .iter()
        .zip(perfs)
        .map(|(p, perf)| (perf.rolling_overlap().powi(2), &p.weights))
        .collect();
    blend_profiles(ENSEMBLE_PROFILE_NAME, &parts)
}
