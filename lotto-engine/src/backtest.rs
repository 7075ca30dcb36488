use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::RngExt;
use serde::{Deserialize, Serialize};

use lotto_db::models::DrawRecord;

use crate::budget::RuntimeBudget;
use crate::cache::{sequence_key, DiagnosticsCache};
use crate::candidates::{generate_candidate_sets, select_sequence_focused_top_set, CandidateOptions};
use crate::diagnostics::format::DEFAULT_POOL;
use crate::diagnostics::FullDiagnostics;
use crate::profiles::{
    ensemble_profile, hybridize, match_utility, preset_profiles, rank_by_rolling, ProfilePerformance, WeightProfile,
};
use crate::reporter::{CancelToken, NoopReporter, Reporter, TraceEvent, TracePhase};
use crate::rng::seeded_rng;
use crate::scoring::{composite_scoring, sort_scores, NumberScore};
use crate::settings::Settings;

/// Queue de validation du balayage initial des profils.
pub const SWEEP_TAIL: usize = 50;
/// Tirages d'entraînement exigés avant la queue de validation.
pub const SWEEP_MIN_TRAIN: usize = 20;
const BACKTEST_SETS: usize = 12;
const ENSEMBLE_EVERY: usize = 5;
const TOP_ROLLING_PROFILES: usize = 4;
/// Plafond par tirage quand aucune limite n'est fixée.
const MASTERY_HARD_LIMIT: u32 = 500;
const MOMENTUM_DECAY: f64 = 0.93;
const MOMENTUM_BASE: f64 = 0.12;
const MOMENTUM_SCORE: f64 = 0.1;
const TREND_WINDOW: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRow {
    pub date: String,
    pub actual: [u8; 6],
    pub bonus: u8,
    /// Grille retenue (meilleure tentative en mode maîtrise).
    pub predicted: [u8; 6],
    /// Recouvrement de la première tentative, seule prédiction honnête.
    pub overlap: usize,
    pub best_overlap: usize,
    pub profile_name: String,
    pub attempts_used: u32,
    pub mastered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_attempt: Option<[u8; 6]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryStats {
    pub total_attempts: u32,
    pub solved_sequences: usize,
    pub forward_hit_rate: f64,
    pub forward_avg_overlap: f64,
    pub best_avg_overlap: f64,
    pub avg_attempts_per_sequence: f64,
    pub global_cap_reached: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningTrend {
    pub window: usize,
    pub early_avg_overlap: f64,
    pub late_avg_overlap: f64,
    pub delta: f64,
}

impl LearningTrend {
    pub fn from_overlaps(overlaps: &[usize]) -> Self {
        let window = TREND_WINDOW.min(overlaps.len() / 2);
        if window == 0 {
            return Self::default();
        }
        let avg = |xs: &[usize]| xs.iter().sum::<usize>() as f64 / xs.len() as f64;
        let early = avg(&overlaps[..window]);
        let late = avg(&overlaps[overlaps.len() - window..]);
        Self { window, early_avg_overlap: early, late_avg_overlap: late, delta: late - early }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepScore {
    pub name: String,
    pub utility: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub train_size: usize,
    pub test_size: usize,
    pub pool_size: usize,
    pub model_hit_rate: f64,
    pub avg_overlap: f64,
    pub best_overlap: usize,
    pub random_baseline_overlap: f64,
    pub hit_distribution: [usize; 8],
    pub total_utility: f64,
    pub rows: Vec<BacktestRow>,
    pub sweep: Vec<SweepScore>,
    pub profile_performance: Vec<ProfilePerformance>,
    pub final_profile: WeightProfile,
    pub learning_trend: LearningTrend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastery: Option<MasteryStats>,
    #[serde(skip)]
    pub final_diagnostics: Option<Arc<FullDiagnostics>>,
    /// Clé de contenu de l'historique ayant produit `final_diagnostics`.
    #[serde(skip)]
    pub final_history_key: Option<String>,
}

impl BacktestResult {
    /// Résultat à zéro pour un historique trop court.
    pub fn degenerate(pool_size: usize, train_size: usize) -> Self {
        let presets = preset_profiles();
        Self {
            train_size,
            test_size: 0,
            pool_size,
            model_hit_rate: 0.0,
            avg_overlap: 0.0,
            best_overlap: 0,
            random_baseline_overlap: random_baseline(pool_size),
            hit_distribution: [0; 8],
            total_utility: 0.0,
            rows: Vec::new(),
            sweep: Vec::new(),
            profile_performance: presets.iter().map(|p| ProfilePerformance::new(p.name.clone())).collect(),
            final_profile: presets[0].clone(),
            learning_trend: LearningTrend::default(),
            mastery: None,
            final_diagnostics: None,
            final_history_key: None,
        }
    }

    /// Utilité moyenne par tirage testé, critère de comparaison des tours.
    pub fn score(&self) -> f64 {
        if self.test_size == 0 { 0.0 } else { self.total_utility / self.test_size as f64 }
    }

    /// Profils preset triés par performance glissante.
    pub fn top_rolling(&self, k: usize) -> Vec<&ProfilePerformance> {
        rank_by_rolling(&self.profile_performance)
            .into_iter()
            .take(k)
            .map(|i| &self.profile_performance[i])
            .collect()
    }
}

/// Recouvrement moyen attendu d'une grille aléatoire contre la cible à 7 boules.
pub fn random_baseline(pool_size: usize) -> f64 {
    7.0 * 6.0 / pool_size.max(1) as f64
}

/// Tout ce dont une passe de backtest a besoin en plus de l'historique.
pub struct BacktestContext<'a> {
    pub settings: &'a Settings,
    pub budget: &'a RuntimeBudget,
    pub reporter: &'a dyn Reporter,
    pub cancel: &'a CancelToken,
    /// Sel propre au tour d'entraînement.
    pub salt: String,
    pub warm_profile: Option<WeightProfile>,
    pub sweep_band: (f64, f64),
    pub backtest_band: (f64, f64),
}

fn band(range: (f64, f64), done: usize, total: usize) -> f64 {
    let frac = if total == 0 { 1.0 } else { done as f64 / total as f64 };
    range.0 + (range.1 - range.0) * frac.clamp(0.0, 1.0)
}

fn top_six(scores: &[NumberScore]) -> [u8; 6] {
    let mut out = [0u8; 6];
    for (slot, s) in out.iter_mut().zip(scores) {
        *slot = s.number;
    }
    out.sort();
    out
}

/// Grille consensus : 12 candidates rapides puis sélection centrée séquence.
fn consensus_pick(
    scores: &[NumberScore],
    diagnostics: &FullDiagnostics,
    history: &[DrawRecord],
    rng: &mut StdRng,
    options: &CandidateOptions,
    cache: &mut DiagnosticsCache,
) -> [u8; 6] {
    let sets = generate_candidate_sets(scores, diagnostics, history, BACKTEST_SETS, rng, options, cache);
    select_sequence_focused_top_set(&sets, scores)
}

fn seed_parts(date: &str, history_len: usize, profile: &str, salt: &str) -> [String; 4] {
    [date.to_string(), history_len.to_string(), profile.to_string(), salt.to_string()]
}

fn rng_for(parts: &[String]) -> StdRng {
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    seeded_rng(&refs)
}

/// Balayage des 7 presets sur les 50 derniers tirages d'entraînement, en utilité cumulée.
fn sweep_profiles(
    draws: &[DrawRecord],
    train: usize,
    presets: &[WeightProfile],
    ctx: &BacktestContext<'_>,
    cache: &mut DiagnosticsCache,
) -> Result<Vec<SweepScore>> {
    let options = CandidateOptions::fast(ctx.budget);
    let start = train - SWEEP_TAIL;
    let total = presets.len() * SWEEP_TAIL;
    let mut scores = Vec::with_capacity(presets.len());
    for (pi, profile) in presets.iter().enumerate() {
        let mut utility = 0.0;
        for t in start..train {
            ctx.cancel.check()?;
            let history = &draws[..t];
            let diagnostics = cache.get(history);
            let number_scores = composite_scoring(&diagnostics, history, profile)?;
            let mut rng = rng_for(&seed_parts(&draws[t].date, t, &profile.name, &ctx.salt));
            let pick = consensus_pick(&number_scores, &diagnostics, history, &mut rng, &options, cache);
            utility += match_utility(draws[t].overlap(&pick));
            let done = pi * SWEEP_TAIL + (t - start) + 1;
            ctx.reporter.progress(band(ctx.sweep_band, done, total), "Balayage des profils");
        }
        log::debug!("balayage : {} utilité {:.1}", profile.name, utility);
        scores.push(SweepScore { name: profile.name.clone(), utility });
    }
    Ok(scores)
}

struct MasteryOutcome {
    first: [u8; 6],
    first_overlap: usize,
    best: [u8; 6],
    best_overlap: usize,
    attempts: u32,
    profile_name: String,
}

fn jitter_scores(scores: &[NumberScore], momentum: &[f64], amplitude: f64, rng: &mut StdRng) -> Vec<NumberScore> {
    let max_c = scores.iter().map(|s| s.composite_score).fold(0.0, f64::max).max(1e-9);
    let mut out = scores.to_vec();
    for s in out.iter_mut() {
        let m = momentum.get(s.number as usize).copied().unwrap_or(0.0);
        let noise = (rng.random::<f64>() * 2.0 - 1.0) * amplitude * max_c;
        s.composite_score = (s.composite_score * (1.0 + m) + noise).max(0.0);
    }
    sort_scores(&mut out);
    out
}

/// Boucle de tentatives bornée sur un tirage connu. Elle converge vers la réponse : c'est un
/// test de robustesse du moteur, pas une prévision.
#[allow(clippy::too_many_arguments)]
fn mastery_attempts(
    actual: &DrawRecord,
    index: usize,
    total_rows: usize,
    history: &[DrawRecord],
    diagnostics: &FullDiagnostics,
    base_scores: &[NumberScore],
    current: &WeightProfile,
    presets: &[WeightProfile],
    perfs: &[ProfilePerformance],
    attempt_budget: u32,
    ctx: &BacktestContext<'_>,
    cache: &mut DiagnosticsCache,
) -> Result<MasteryOutcome> {
    let settings = ctx.settings;
    let target = settings.target_sequence_match;
    let rotation: Vec<usize> = rank_by_rolling(perfs).into_iter().take(TOP_ROLLING_PROFILES).collect();
    let mut momentum = vec![0.0f64; diagnostics.pool_size + 1];
    let mut previous: Option<[u8; 6]> = None;
    let mut stagnant = 0u32;
    let mut outcome: Option<MasteryOutcome> = None;

    for attempt in 0..attempt_budget {
        ctx.cancel.check()?;
        let (pick, profile_name) = if attempt == 0 {
            // première tentative : la grille consensus du mode standard
            let mut rng = rng_for(&seed_parts(&actual.date, history.len(), &current.name, &ctx.salt));
            let options = CandidateOptions::fast(ctx.budget);
            let pick = consensus_pick(base_scores, diagnostics, history, &mut rng, &options, cache);
            (pick, current.name.clone())
        } else {
            let profile = &presets[rotation[(attempt as usize - 1) % rotation.len()]];
            let scores = composite_scoring(diagnostics, history, profile)?;
            let mut parts = seed_parts(&actual.date, history.len(), &profile.name, &ctx.salt).to_vec();
            parts.push(format!("attempt-{attempt}"));
            let mut rng = rng_for(&parts);

            let mut amplitude = 0.35 / ((attempt + 1) as f64).sqrt();
            if stagnant >= 2 {
                amplitude += 0.25;
            }
            let jittered = jitter_scores(&scores, &momentum, amplitude, &mut rng);
            let growth = 1 + attempt as usize / 6;
            let batch = (8 + 4 * (attempt as usize / 6)).min(24);
            let options = CandidateOptions {
                include_monte_carlo: true,
                monte_carlo_trials: ctx.budget.mastery_trials * growth,
                ..CandidateOptions::fast(ctx.budget)
            };
            let sets = generate_candidate_sets(&jittered, diagnostics, history, batch, &mut rng, &options, cache);
            let pick = if sets.is_empty() {
                select_sequence_focused_top_set(&sets, &jittered)
            } else {
                sets[rng.random_range(0..sets.len())].numbers
            };
            (pick, profile.name.clone())
        };

        let overlap = actual.overlap(&pick);
        let state = outcome.get_or_insert_with(|| MasteryOutcome {
            first: pick,
            first_overlap: overlap,
            best: pick,
            best_overlap: overlap,
            attempts: 0,
            profile_name: profile_name.clone(),
        });
        state.attempts = attempt + 1;
        if overlap > state.best_overlap {
            state.best = pick;
            state.best_overlap = overlap;
            state.profile_name = profile_name.clone();
        }

        for m in momentum.iter_mut() {
            *m *= MOMENTUM_DECAY;
        }
        let reinforcement = MOMENTUM_BASE + MOMENTUM_SCORE * overlap as f64 / 7.0;
        for &n in &pick {
            if let Some(m) = momentum.get_mut(n as usize) {
                *m += reinforcement;
            }
        }
        stagnant = if previous == Some(pick) { stagnant + 1 } else { 0 };
        previous = Some(pick);

        let every = settings.mastery_progress_every_attempts;
        ctx.reporter.trace(&TraceEvent {
            phase: TracePhase::MasteryAttempt,
            sequence_index: index,
            sequence_total: total_rows,
            date: actual.date.clone(),
            actual: actual.numbers.to_vec(),
            bonus: actual.bonus,
            predicted: pick.to_vec(),
            overlap,
            best_overlap: Some(state.best_overlap),
            attempts_used: Some(attempt + 1),
            attempt_cap: settings.mastery_max_attempts_per_sequence,
            profile_name: Some(profile_name),
            milestone: attempt == 0 || (attempt + 1) % every == 0 || overlap >= 4,
        });

        if overlap >= target {
            break;
        }
    }

    outcome.ok_or_else(|| anyhow::anyhow!("aucune tentative de maîtrise pour le tirage du {}", actual.date))
}

/// Walk-forward sur la partie test : prédire, comparer, apprendre, avancer.
pub fn run_backtest(
    draws: &[DrawRecord],
    ctx: &BacktestContext<'_>,
    cache: &mut DiagnosticsCache,
) -> Result<BacktestResult> {
    let n = draws.len();
    if n < 2 {
        let pool = draws.first().map_or(DEFAULT_POOL, |d| d.format().size());
        return Ok(BacktestResult::degenerate(pool, n));
    }
    let settings = ctx.settings;
    let train = ((n as f64 * settings.train_ratio).floor() as usize).clamp(1, n - 1);
    let presets = preset_profiles();

    let mut perfs: Vec<ProfilePerformance> = presets
        .iter()
        .map(|p| match settings.warm_profile_overlaps.get(&p.name) {
            Some(&prior) => ProfilePerformance::seeded(p.name.clone(), prior),
            None => ProfilePerformance::new(p.name.clone()),
        })
        .collect();

    let sweep = if train >= SWEEP_TAIL + SWEEP_MIN_TRAIN {
        sweep_profiles(draws, train, &presets, ctx, cache)?
    } else {
        Vec::new()
    };
    let winner = sweep
        .iter()
        .enumerate()
        .fold(None::<(usize, f64)>, |best, (i, s)| match best {
            Some((_, u)) if u >= s.utility => best,
            _ => Some((i, s.utility)),
        })
        .map_or(0, |(i, _)| i);
    let mut current = match &ctx.warm_profile {
        Some(warm) => hybridize(warm, &presets[winner]),
        None => presets[winner].clone(),
    };
    log::info!("profil de départ : {} (train {train}, test {})", current.name, n - train);
    ctx.reporter.progress(ctx.sweep_band.1, "Balayage des profils");

    let fast = CandidateOptions::fast(ctx.budget);
    let refresh_every = ctx.budget.backtest_refresh_every.max(1);
    let mut history: Vec<DrawRecord> = draws[..train].to_vec();
    let mut diagnostics = cache.get(&history);
    let mut last_refresh = history.len();

    let test_total = n - train;
    let mut rows: Vec<BacktestRow> = Vec::with_capacity(test_total);
    let mut mastery_total: u32 = 0;
    let mut global_cap_reached = false;
    let stage = if settings.mastery_backtest_mode { "Backtest (maîtrise)" } else { "Backtest" };

    for (index, actual) in draws[train..].iter().enumerate() {
        ctx.cancel.check()?;
        if history.len() - last_refresh >= refresh_every {
            diagnostics = cache.get(&history);
            last_refresh = history.len();
        }
        let scores = composite_scoring(&diagnostics, &history, &current)?;

        let remaining = settings.mastery_global_attempt_cap.map(|cap| cap.saturating_sub(mastery_total));
        let mastery_budget = settings
            .mastery_max_attempts_per_sequence
            .unwrap_or(MASTERY_HARD_LIMIT)
            .min(remaining.unwrap_or(u32::MAX));

        let row = if settings.mastery_backtest_mode && mastery_budget > 0 {
            let outcome = mastery_attempts(
                actual,
                index,
                test_total,
                &history,
                &diagnostics,
                &scores,
                &current,
                &presets,
                &perfs,
                mastery_budget,
                ctx,
                cache,
            )?;
            mastery_total += outcome.attempts;
            BacktestRow {
                date: actual.date.clone(),
                actual: actual.numbers,
                bonus: actual.bonus,
                predicted: outcome.best,
                overlap: outcome.first_overlap,
                best_overlap: outcome.best_overlap,
                profile_name: outcome.profile_name,
                attempts_used: outcome.attempts,
                mastered: outcome.best_overlap >= settings.target_sequence_match,
                first_attempt: Some(outcome.first),
            }
        } else {
            if settings.mastery_backtest_mode && !global_cap_reached {
                log::info!("plafond global de tentatives atteint après {mastery_total} essais");
                global_cap_reached = true;
            }
            let mut rng = rng_for(&seed_parts(&actual.date, history.len(), &current.name, &ctx.salt));
            let pick = consensus_pick(&scores, &diagnostics, &history, &mut rng, &fast, cache);
            let overlap = actual.overlap(&pick);
            BacktestRow {
                date: actual.date.clone(),
                actual: actual.numbers,
                bonus: actual.bonus,
                predicted: pick,
                overlap,
                best_overlap: overlap,
                profile_name: current.name.clone(),
                attempts_used: 0,
                mastered: settings.mastery_backtest_mode && overlap >= settings.target_sequence_match,
                first_attempt: None,
            }
        };

        for (profile, perf) in presets.iter().zip(perfs.iter_mut()) {
            let quick = composite_scoring(&diagnostics, &history, profile)?;
            perf.record(actual.overlap(&top_six(&quick)));
        }

        ctx.reporter.trace(&TraceEvent {
            phase: TracePhase::BacktestRow,
            sequence_index: index,
            sequence_total: test_total,
            date: row.date.clone(),
            actual: row.actual.to_vec(),
            bonus: row.bonus,
            predicted: row.predicted.to_vec(),
            overlap: row.overlap,
            best_overlap: Some(row.best_overlap),
            attempts_used: settings.mastery_backtest_mode.then_some(row.attempts_used),
            attempt_cap: settings.mastery_max_attempts_per_sequence,
            profile_name: Some(row.profile_name.clone()),
            milestone: true,
        });
        rows.push(row);

        history.push(actual.clone());
        if history.len() % ENSEMBLE_EVERY == 0 {
            current = ensemble_profile(&presets, &perfs);
        }
        ctx.reporter.progress(band(ctx.backtest_band, index + 1, test_total), stage);
    }

    let final_diagnostics = cache.get(&history);
    let pool_size = final_diagnostics.pool_size;

    let overlaps: Vec<usize> = rows.iter().map(|r| r.overlap).collect();
    let mut hit_distribution = [0usize; 8];
    for &o in &overlaps {
        hit_distribution[o.min(7)] += 1;
    }
    let avg_overlap = overlaps.iter().sum::<usize>() as f64 / test_total as f64;
    let total_utility: f64 = overlaps.iter().map(|&o| match_utility(o)).sum();

    let mastery = settings.mastery_backtest_mode.then(|| {
        let attempted = rows.iter().filter(|r| r.attempts_used > 0).count();
        MasteryStats {
            total_attempts: mastery_total,
            solved_sequences: rows.iter().filter(|r| r.mastered).count(),
            forward_hit_rate: avg_overlap / 7.0,
            forward_avg_overlap: avg_overlap,
            best_avg_overlap: rows.iter().map(|r| r.best_overlap).sum::<usize>() as f64 / test_total as f64,
            avg_attempts_per_sequence: if attempted > 0 { mastery_total as f64 / attempted as f64 } else { 0.0 },
            global_cap_reached,
        }
    });

    log::info!(
        "backtest : {test_total} tirages, recouvrement moyen {avg_overlap:.3} (hasard {:.3})",
        random_baseline(pool_size)
    );

    Ok(BacktestResult {
        train_size: train,
        test_size: test_total,
        pool_size,
        model_hit_rate: avg_overlap / 7.0,
        avg_overlap,
        best_overlap: rows.iter().map(|r| r.best_overlap).max().unwrap_or(0),
        random_baseline_overlap: random_baseline(pool_size),
        hit_distribution,
        total_utility,
        learning_trend: LearningTrend::from_overlaps(&overlaps),
        rows,
        sweep,
        profile_performance: perfs,
        final_profile: current,
        mastery,
        final_diagnostics: Some(final_diagnostics),
        final_history_key: Some(sequence_key(&history)),
    })
}

/// Backtest autonome avec les réglages par défaut.
pub fn backtest(draws: &[DrawRecord], pool_size: usize) -> Result<BacktestResult> {
    if draws.len() < 2 {
        return Ok(BacktestResult::degenerate(pool_size, draws.len()));
    }
    let settings = Settings::default();
    let budget = RuntimeBudget::calibrate(draws.len(), &settings);
    let mut cache = DiagnosticsCache::new(settings.diagnostics_cache_capacity);
    let ctx = BacktestContext {
        settings: &settings,
        budget: &budget,
        reporter: &NoopReporter,
        cancel: &CancelToken::never(),
        salt: settings.random_seed_salt.clone(),
        warm_profile: None,
        sweep_band: (0.0, 20.0),
        backtest_band: (20.0, 100.0),
    };
    run_backtest(draws, &ctx, &mut cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ModelSettings, RoundLimit};
    use lotto_db::models::make_test_draws;

    fn run(draws: &[DrawRecord], settings: &Settings) -> BacktestResult {
        let budget = RuntimeBudget::calibrate(draws.len(), settings);
        let mut cache = DiagnosticsCache::new(settings.diagnostics_cache_capacity);
        let ctx = BacktestContext {
            settings,
            budget: &budget,
            reporter: &NoopReporter,
            cancel: &CancelToken::never(),
            salt: settings.random_seed_salt.clone(),
            warm_profile: settings.warm_start_profile.clone(),
            sweep_band: (0.0, 20.0),
            backtest_band: (20.0, 100.0),
        };
        run_backtest(draws, &ctx, &mut cache).unwrap()
    }

    #[test]
    fn test_degenerate_inputs() {
        let r = backtest(&[], 52).unwrap();
        assert_eq!(r.test_size, 0);
        assert_eq!(r.model_hit_rate, 0.0);
        let one = make_test_draws(1, 49, 1);
        let r = backtest(&one, 49).unwrap();
        assert_eq!(r.test_size, 0);
        assert!(r.rows.is_empty());
    }

    #[test]
    fn test_split_and_metrics() {
        let draws = make_test_draws(40, 49, 3);
        let r = backtest(&draws, 49).unwrap();
        assert_eq!(r.train_size, 32);
        assert_eq!(r.test_size, 8);
        assert_eq!(r.rows.len(), 8);
        assert!(r.sweep.is_empty());
        assert_eq!(r.hit_distribution.iter().sum::<usize>(), 8);
        assert!((r.model_hit_rate - r.avg_overlap / 7.0).abs() < 1e-12);
        assert!((r.random_baseline_overlap - 42.0 / 49.0).abs() < 1e-12);
        for (row, actual) in r.rows.iter().zip(&draws[32..]) {
            assert_eq!(row.overlap, actual.overlap(&row.predicted));
        }
    }

    #[test]
    fn test_sweep_runs_with_long_training() {
        let settings = ModelSettings { train_ratio: Some(0.9), ..Default::default() }.resolve();
        let draws = make_test_draws(80, 49, 4);
        let r = run(&draws, &settings);
        assert_eq!(r.train_size, 72);
        assert_eq!(r.sweep.len(), 7);
        assert!(r.profile_performance.iter().all(|p| p.samples == 8));
    }

    #[test]
    fn test_deterministic() {
        let draws = make_test_draws(45, 52, 5);
        let a = backtest(&draws, 52).unwrap();
        let b = backtest(&draws, 52).unwrap();
        assert_eq!(a.model_hit_rate, b.model_hit_rate);
        let pa: Vec<_> = a.rows.iter().map(|r| r.predicted).collect();
        let pb: Vec<_> = b.rows.iter().map(|r| r.predicted).collect();
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_mastery_respects_caps() {
        let settings = ModelSettings {
            mastery_backtest_mode: Some(true),
            target_sequence_match: Some(6),
            mastery_max_attempts_per_sequence: Some(RoundLimit::Finite(3)),
            mastery_global_attempt_cap: Some(RoundLimit::Finite(10)),
            fast_mode: Some(true),
            ..Default::default()
        }
        .resolve();
        let draws = make_test_draws(40, 49, 6);
        let r = run(&draws, &settings);
        let m = r.mastery.unwrap();
        assert!(m.total_attempts <= 10);
        assert!(r.rows.iter().all(|row| row.attempts_used <= 3));
        assert!(m.solved_sequences <= r.test_size);
        assert_eq!(r.rows.iter().map(|row| row.attempts_used).sum::<u32>(), m.total_attempts);
        // 8 tirages à 3 essais au plus : le plafond global coupe avant la fin
        assert!(m.global_cap_reached);
        assert!(r.rows.iter().all(|row| row.best_overlap >= row.overlap));
    }

    #[test]
    fn test_ensemble_reblended_without_continuous_training() {
        let draws = make_test_draws(120, 49, 0x7f4a7c15);
        let r = backtest(&draws, 49).unwrap();
        assert_eq!(r.train_size, 96);
        assert_eq!(r.sweep.len(), 7);
        assert_eq!(r.final_profile.name, crate::profiles::ENSEMBLE_PROFILE_NAME);
        // historique à 100 après le 4e tirage testé
        assert!(r.rows[..4].iter().all(|row| row.profile_name != crate::profiles::ENSEMBLE_PROFILE_NAME));
        assert!(r.rows[4..].iter().all(|row| row.profile_name == crate::profiles::ENSEMBLE_PROFILE_NAME));
    }

    #[test]
    fn test_sweep_needs_minimum_training() {
        let settings = ModelSettings { train_ratio: Some(0.9), ..Default::default() }.resolve();
        let short = make_test_draws(77, 49, 8);
        let r = run(&short, &settings);
        assert_eq!(r.train_size, SWEEP_TAIL + SWEEP_MIN_TRAIN - 1);
        assert!(r.sweep.is_empty());
    }

    #[test]
    fn test_mastery_first_attempt_is_consensus_pick() {
        let base = ModelSettings { fast_mode: Some(true), ..Default::default() };
        let mastery = ModelSettings {
            mastery_backtest_mode: Some(true),
            target_sequence_match: Some(6),
            mastery_max_attempts_per_sequence: Some(RoundLimit::Finite(2)),
            ..base.clone()
        };
        let draws = make_test_draws(40, 49, 9);
        let standard = run(&draws, &base.resolve());
        let searched = run(&draws, &mastery.resolve());
        assert_eq!(standard.rows.len(), searched.rows.len());
        for (s, m) in standard.rows.iter().zip(&searched.rows) {
            assert_eq!(m.first_attempt, Some(s.predicted));
            assert_eq!(m.overlap, s.overlap);
        }
    }

    #[test]
    fn test_final_history_key_matches_draws() {
        let draws = make_test_draws(30, 49, 10);
        let r = backtest(&draws, 49).unwrap();
        assert_eq!(r.final_history_key.as_deref(), Some(sequence_key(&draws).as_str()));
    }

    #[test]
    fn test_learning_trend_windows() {
        let t = LearningTrend::from_overlaps(&[0, 0, 1, 1, 2, 2]);
        assert_eq!(t.window, 3);
        assert!((t.early_avg_overlap - 1.0 / 3.0).abs() < 1e-12);
        assert!((t.late_avg_overlap - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(LearningTrend::from_overlaps(&[3]).window, 0);
    }
}
