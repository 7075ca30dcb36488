use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::profiles::WeightProfile;

/// Réglages tels que fournis par l'appelant : tout est optionnel.
/// `resolve()` applique défauts et bornes en un seul endroit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    pub train_ratio: Option<f64>,
    pub fast_mode: Option<bool>,
    pub continuous_training: Option<bool>,
    pub target_sequence_match: Option<usize>,
    /// Entier ou `"unbounded"`.
    pub max_optimization_rounds: Option<RoundLimit>,
    pub mastery_backtest_mode: Option<bool>,
    pub mastery_max_attempts_per_sequence: Option<RoundLimit>,
    pub mastery_global_attempt_cap: Option<RoundLimit>,
    pub mastery_progress_every_attempts: Option<u32>,
    pub include_monte_carlo: Option<bool>,
    pub include_genetic: Option<bool>,
    pub include_historical_echo: Option<bool>,
    pub include_sliding_window: Option<bool>,
    pub monte_carlo_min_trials: Option<usize>,
    pub monte_carlo_max_trials: Option<usize>,
    pub genetic_generations: Option<usize>,
    pub genetic_population: Option<usize>,
    pub target_latency_ms: Option<u64>,
    pub warm_start_enabled: Option<bool>,
    pub warm_start_profile: Option<WeightProfile>,
    pub warm_profile_overlaps: Option<BTreeMap<String, f64>>,
    pub random_seed_salt: Option<String>,
    pub diagnostics_cache_capacity: Option<usize>,
}

/// Borne entière ou illimitée (`"unbounded"` en JSON).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoundLimit {
    Finite(u32),
    Unbounded(Unbounded),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unbounded {
    Unbounded,
}

impl RoundLimit {
    pub const UNBOUNDED: RoundLimit = RoundLimit::Unbounded(Unbounded::Unbounded);

    pub fn finite(&self) -> Option<u32> {
        match self {
            RoundLimit::Finite(n) => Some(*n),
            RoundLimit::Unbounded(_) => None,
        }
    }
}

/// Réglages résolus, consommés par le moteur.
#[derive(Debug, Clone)]
pub struct Settings {
    pub train_ratio: f64,
    pub fast_mode: bool,
    pub continuous_training: bool,
    pub target_sequence_match: usize,
    /// `None` = illimité.
    pub max_optimization_rounds: Option<u32>,
    pub mastery_backtest_mode: bool,
    pub mastery_max_attempts_per_sequence: Option<u32>,
    pub mastery_global_attempt_cap: Option<u32>,
    pub mastery_progress_every_attempts: u32,
    pub include_monte_carlo: bool,
    pub include_genetic: bool,
    pub include_historical_echo: bool,
    pub include_sliding_window: bool,
    pub monte_carlo_min_trials: usize,
    pub monte_carlo_max_trials: usize,
    pub genetic_generations: Option<usize>,
    pub genetic_population: Option<usize>,
    pub target_latency_ms: u64,
    pub warm_start_profile: Option<WeightProfile>,
    pub warm_profile_overlaps: BTreeMap<String, f64>,
    pub random_seed_salt: String,
    pub diagnostics_cache_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        ModelSettings::default().resolve()
    }
}

impl ModelSettings {
    pub fn resolve(&self) -> Settings {
        let min_trials = self.monte_carlo_min_trials.unwrap_or(1_500).clamp(100, 200_000);
        let max_trials = self.monte_carlo_max_trials.unwrap_or(18_000).clamp(min_trials, 400_000);
        let warm_enabled = self.warm_start_enabled.unwrap_or(false);

        Settings {
            train_ratio: self.train_ratio.unwrap_or(0.8).clamp(0.5, 0.95),
            fast_mode: self.fast_mode.unwrap_or(false),
            continuous_training: self.continuous_training.unwrap_or(false),
            target_sequence_match: self.target_sequence_match.unwrap_or(3).clamp(1, 6),
            max_optimization_rounds: self
                .max_optimization_rounds
                .unwrap_or(RoundLimit::Finite(3))
                .finite()
                .map(|n| n.max(1)),
            mastery_backtest_mode: self.mastery_backtest_mode.unwrap_or(false),
            mastery_max_attempts_per_sequence: self
                .mastery_max_attempts_per_sequence
                .unwrap_or(RoundLimit::Finite(24))
                .finite()
                .map(|n| n.max(1)),
            mastery_global_attempt_cap: self
                .mastery_global_attempt_cap
                .unwrap_or(RoundLimit::Finite(2_000))
                .finite(),
            mastery_progress_every_attempts: self.mastery_progress_every_attempts.unwrap_or(4).max(1),
            include_monte_carlo: self.include_monte_carlo.unwrap_or(true),
            include_genetic: self.include_genetic.unwrap_or(true),
            include_historical_echo: self.include_historical_echo.unwrap_or(true),
            include_sliding_window: self.include_sliding_window.unwrap_or(false),
            monte_carlo_min_trials: min_trials,
            monte_carlo_max_trials: max_trials,
            genetic_generations: self.genetic_generations.map(|g| g.clamp(5, 1_000)),
            genetic_population: self.genetic_population.map(|p| p.clamp(20, 2_000)),
            target_latency_ms: self.target_latency_ms.unwrap_or(2_500).clamp(200, 120_000),
            warm_start_profile: if warm_enabled {
                self.warm_start_profile.as_ref().map(|p| p.normalized())
            } else {
                None
            },
            warm_profile_overlaps: if warm_enabled {
                self.warm_profile_overlaps.clone().unwrap_or_default()
            } else {
                BTreeMap::new()
            },
            random_seed_salt: self.random_seed_salt.clone().unwrap_or_default(),
            diagnostics_cache_capacity: self.diagnostics_cache_capacity.unwrap_or(160).clamp(8, 4_096),
        }
    }
}
