use crate::settings::Settings;

/// Latence de référence pour laquelle les budgets par défaut sont calibrés.
const REFERENCE_LATENCY_MS: f64 = 2_500.0;
/// Taille d'historique de référence.
const REFERENCE_HISTORY: f64 = 600.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeBudget {
    pub monte_carlo_trials: usize,
    pub genetic_generations: usize,
    pub genetic_population: usize,
    /// Rafraîchissement des diagnostics tous les N tirages en backtest.
    pub backtest_refresh_every: usize,
    /// Nombre maximal de fenêtres examinées par la recherche d'écho.
    pub echo_window_cap: usize,
    pub echo_top_k: usize,
    /// Essais Monte Carlo par tentative de maîtrise (avant croissance).
    pub mastery_trials: usize,
}

impl RuntimeBudget {
    /// Dérive les budgets de la taille d'historique et du réglage rapide/latence cible.
    pub fn calibrate(history_len: usize, settings: &Settings) -> Self {
        let latency_scale = (settings.target_latency_ms as f64 / REFERENCE_LATENCY_MS).clamp(0.25, 4.0);
        let size_scale = (REFERENCE_HISTORY / history_len.max(1) as f64).clamp(0.35, 1.0);
        let fast_scale = if settings.fast_mode { 0.35 } else { 1.0 };
        let scale = latency_scale * size_scale * fast_scale;

        let monte_carlo_trials = ((settings.monte_carlo_max_trials as f64 * scale).round() as usize)
            .clamp(settings.monte_carlo_min_trials, settings.monte_carlo_max_trials);

        let genetic_generations = settings
            .genetic_generations
            .unwrap_or_else(|| ((100.0 * scale).round() as usize).clamp(45, 100));
        let genetic_population = settings
            .genetic_population
            .unwrap_or_else(|| ((250.0 * scale).round() as usize).clamp(120, 250));

        let mut backtest_refresh_every = history_len.div_ceil(150).clamp(1, 8);
        if settings.fast_mode {
            backtest_refresh_every = (backtest_refresh_every * 2).min(12);
        }

        let echo_window_cap = ((120.0 * latency_scale * fast_scale).round() as usize).clamp(24, 240);
        let mastery_trials = ((600.0 * latency_scale * fast_scale).round() as usize).clamp(150, 2_400);

        Self {
            monte_carlo_trials,
            genetic_generations,
            genetic_population,
            backtest_refresh_every,
            echo_window_cap,
            echo_top_k: 3,
            mastery_trials,
        }
    }
}
