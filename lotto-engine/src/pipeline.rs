use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use lotto_db::models::{sort_chronological, DrawRecord};

use crate::backtest::{run_backtest, BacktestContext, BacktestResult};
use crate::budget::RuntimeBudget;
use crate::cache::{sequence_key, DiagnosticsCache};
use crate::candidates::{
    generate_candidate_sets, recompute_lift, select_sequence_focused_top_set, CandidateOptions, Method, PredictedSet,
    SetScorer,
};
use crate::diagnostics::frequency::group_counts;
use crate::diagnostics::{BiasVerdict, FullDiagnostics};
use crate::profiles::{preset_profiles, WeightProfile};
use crate::reporter::{CancelToken, Reporter, RoundSummary};
use crate::rng::seeded_rng;
use crate::scoring::{bayesian_smoothed, blend_scores, composite_scoring, BayesianEstimate, NumberScore};
use crate::settings::Settings;

pub const FINAL_SET_COUNT: usize = 14;
const LEARNED_PROFILE_WEIGHT: f64 = 2.25;
const ROLLING_PROFILE_BONUS: f64 = 0.75;
const BLEND_TOP_PROFILES: usize = 4;
/// Tours consécutifs sans amélioration avant arrêt en mode illimité.
const PATIENCE_ROUNDS: u32 = 3;
/// Plafond de sécurité des tours en mode illimité.
const UNBOUNDED_ROUND_LIMIT: u32 = 50;

const DIAGNOSTICS_END: f64 = 5.0;
const BACKTEST_END: f64 = 85.0;
/// Part du balayage des profils dans la tranche d'un tour.
const SWEEP_SHARE: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionOutput {
    pub sets: Vec<PredictedSet>,
    pub backtest: BacktestResult,
    pub scores: Vec<NumberScore>,
    pub bayesian: Vec<BayesianEstimate>,
    pub warning: String,
    pub pool_size: usize,
    pub draw_count: usize,
    #[serde(default)]
    pub rounds: Vec<RoundSummary>,
}

/// Message d'avertissement attaché à chaque prédiction.
pub fn bias_warning(bias: &BiasVerdict) -> String {
    if bias.biased {
        format!(
            "Écarts détectés ({}). Le tirage reste un processus aléatoire : ces grilles ne garantissent aucun gain.",
            bias.reasons.join(" ; ")
        )
    } else {
        "Aucun biais exploitable détecté : les tirages sont compatibles avec le hasard uniforme. \
         Ces grilles sont un exercice statistique, pas une prévision."
            .to_string()
    }
}

fn round_salt(base: &str, round: u32) -> String {
    if round == 0 {
        base.to_string()
    } else {
        format!("{base}#r{round}")
    }
}

/// Tranche de progression d'un tour. En mode illimité chaque tour prend la moitié du reste.
fn round_band(round: u32, limit: Option<u32>) -> (f64, f64) {
    let span = BACKTEST_END - DIAGNOSTICS_END;
    match limit {
        Some(total) => {
            let step = span / total.max(1) as f64;
            (DIAGNOSTICS_END + step * round as f64, DIAGNOSTICS_END + step * (round + 1) as f64)
        }
        None => {
            let remaining = |r: u32| span * 0.5f64.powi(r as i32);
            (BACKTEST_END - remaining(round), BACKTEST_END - remaining(round + 1))
        }
    }
}

/// Recouvrements glissants des presets, réinjectés au tour suivant.
fn rolling_overlaps(result: &BacktestResult) -> std::collections::BTreeMap<String, f64> {
    result
        .profile_performance
        .iter()
        .filter(|p| p.samples > 0)
        .map(|p| (p.name.clone(), p.rolling_overlap()))
        .collect()
}

/// Enchaîne les tours d'entraînement et garde le meilleur backtest.
fn train_rounds(
    draws: &[DrawRecord],
    settings: &Settings,
    budget: &RuntimeBudget,
    reporter: &dyn Reporter,
    cancel: &CancelToken,
    cache: &mut DiagnosticsCache,
) -> Result<(BacktestResult, Vec<RoundSummary>)> {
    let limit = if settings.continuous_training { settings.max_optimization_rounds } else { Some(1) };
    let hard_limit = limit.unwrap_or(UNBOUNDED_ROUND_LIMIT);

    let mut best: Option<BacktestResult> = None;
    let mut summaries = Vec::new();
    let mut stale = 0u32;
    let mut round_settings = settings.clone();
    let mut warm = settings.warm_start_profile.clone();

    for round in 0..hard_limit {
        cancel.check()?;
        let (start, end) = round_band(round, limit);
        let split = start + (end - start) * SWEEP_SHARE;
        let ctx = BacktestContext {
            settings: &round_settings,
            budget,
            reporter,
            cancel,
            salt: round_salt(&settings.random_seed_salt, round),
            warm_profile: warm.clone(),
            sweep_band: (start, split),
            backtest_band: (split, end),
        };
        let result = run_backtest(draws, &ctx, cache)?;

        let improved = best.as_ref().map_or(true, |b| result.score() > b.score() + 1e-12);
        let summary = RoundSummary {
            round: round + 1,
            score: result.score(),
            model_hit_rate: result.model_hit_rate,
            best_overlap: result.best_overlap,
            profile_name: result.final_profile.name.clone(),
            improved,
        };
        log::info!(
            "tour {} : utilité moyenne {:.3}, recouvrement {:.3}{}",
            summary.round,
            summary.score,
            result.avg_overlap,
            if improved { " (meilleur)" } else { "" }
        );
        reporter.round(&summary);
        summaries.push(summary);

        warm = Some(result.final_profile.clone());
        round_settings.warm_profile_overlaps = rolling_overlaps(&result);
        let target_met = result.best_overlap >= settings.target_sequence_match;
        if improved {
            best = Some(result);
            stale = 0;
        } else {
            stale += 1;
        }

        if limit.is_none() && (target_met || stale >= PATIENCE_ROUNDS) {
            break;
        }
    }

    match best {
        Some(result) => Ok((result, summaries)),
        None => bail!("aucun tour d'entraînement n'a abouti"),
    }
}

/// Scores finaux : profil appris pondéré 2.25, plus les 4 meilleurs presets glissants.
fn ensemble_scores(
    diagnostics: &FullDiagnostics,
    draws: &[DrawRecord],
    backtest: &BacktestResult,
) -> Result<Vec<NumberScore>> {
    let presets = preset_profiles();
    let mut weighted: Vec<(f64, Vec<NumberScore>)> = vec![(
        LEARNED_PROFILE_WEIGHT,
        composite_scoring(diagnostics, draws, &backtest.final_profile)?,
    )];
    for perf in backtest.top_rolling(BLEND_TOP_PROFILES) {
        let Some(profile) = presets.iter().find(|p| p.name == perf.name) else {
            continue;
        };
        let weight = perf.rolling_overlap().max(1.0) + ROLLING_PROFILE_BONUS;
        weighted.push((weight, composite_scoring(diagnostics, draws, profile)?));
    }
    let parts: Vec<(f64, &[NumberScore])> = weighted.iter().map(|(w, s)| (*w, &s[..])).collect();
    Ok(blend_scores(&parts))
}

/// Ajoute la grille consensus en tête du lot, sans doublon.
fn prepend_consensus(sets: &mut Vec<PredictedSet>, scores: &[NumberScore], diagnostics: &FullDiagnostics) {
    let consensus = select_sequence_focused_top_set(sets, scores);
    if consensus.iter().any(|&n| n == 0) {
        return;
    }
    sets.retain(|s| s.numbers != consensus);
    let mut scorer = SetScorer::new(diagnostics, scores);
    sets.insert(
        0,
        PredictedSet {
            numbers: consensus,
            total_score: scorer.score(&consensus),
            group_breakdown: group_counts(&consensus, diagnostics.pool_size),
            relative_lift: 0.0,
            method: Method::Consensus,
        },
    );
    recompute_lift(sets);
}

struct FinalArtifacts {
    sets: Vec<PredictedSet>,
    scores: Vec<NumberScore>,
    warning: String,
}

#[allow(clippy::too_many_arguments)]
fn build_final_artifacts(
    draws: &[DrawRecord],
    diagnostics: &FullDiagnostics,
    backtest: &BacktestResult,
    settings: &Settings,
    budget: &RuntimeBudget,
    reporter: &dyn Reporter,
    cancel: &CancelToken,
    cache: &mut DiagnosticsCache,
) -> Result<FinalArtifacts> {
    cancel.check()?;
    reporter.progress(BACKTEST_END, "Scores finaux");
    let scores = ensemble_scores(diagnostics, draws, backtest)?;

    reporter.progress(90.0, "Génération des grilles");
    let last_date = draws.last().map_or("", |d| d.date.as_str());
    let len = draws.len().to_string();
    let mut rng = seeded_rng(&[last_date, len.as_str(), "final", settings.random_seed_salt.as_str()]);
    let options = CandidateOptions::full(settings, budget);
    let mut sets = generate_candidate_sets(&scores, diagnostics, draws, FINAL_SET_COUNT, &mut rng, &options, cache);
    cancel.check()?;
    prepend_consensus(&mut sets, &scores, diagnostics);
    if sets.is_empty() {
        bail!("aucune grille candidate n'a pu être générée");
    }

    reporter.progress(100.0, "Terminé");
    Ok(FinalArtifacts { sets, scores, warning: bias_warning(&diagnostics.bias) })
}

fn prepared(draws: &[DrawRecord]) -> Result<Vec<DrawRecord>> {
    if draws.is_empty() {
        bail!("aucun tirage : importez un historique avant de lancer une prédiction");
    }
    let mut sorted = draws.to_vec();
    sort_chronological(&mut sorted);
    Ok(sorted)
}

/// Pipeline complet : diagnostics, tours d'entraînement, scores ensemblistes, grilles finales.
/// Fonction pure de ses entrées, exécutable en ligne ou dans un worker.
pub fn run_prediction(
    draws: &[DrawRecord],
    settings: &Settings,
    reporter: &dyn Reporter,
    cancel: &CancelToken,
) -> Result<PredictionOutput> {
    let draws = prepared(draws)?;
    let budget = RuntimeBudget::calibrate(draws.len(), settings);
    log::debug!("budget calibré : {budget:?}");
    let mut cache = DiagnosticsCache::new(settings.diagnostics_cache_capacity);

    reporter.progress(0.0, "Diagnostics");
    let diagnostics = cache.get(&draws);
    reporter.progress(DIAGNOSTICS_END, "Diagnostics");

    let (backtest, rounds) = train_rounds(&draws, settings, &budget, reporter, cancel, &mut cache)?;
    let artifacts = build_final_artifacts(&draws, &diagnostics, &backtest, settings, &budget, reporter, cancel, &mut cache)?;
    let (hits, misses) = cache.stats();
    log::debug!("cache de diagnostics : {hits} succès, {misses} échecs");

    Ok(PredictionOutput {
        sets: artifacts.sets,
        scores: artifacts.scores,
        warning: artifacts.warning,
        bayesian: bayesian_smoothed(&draws, diagnostics.pool_size),
        pool_size: diagnostics.pool_size,
        draw_count: draws.len(),
        backtest,
        rounds,
    })
}

/// Régénère seulement les grilles finales à partir d'une prédiction existante.
pub fn refresh_prediction_candidates(
    draws: &[DrawRecord],
    base: &PredictionOutput,
    settings: &Settings,
    reporter: &dyn Reporter,
    cancel: &CancelToken,
) -> Result<PredictionOutput> {
    let draws = prepared(draws)?;
    let budget = RuntimeBudget::calibrate(draws.len(), settings);
    let mut cache = DiagnosticsCache::new(settings.diagnostics_cache_capacity);
    // diagnostics conservés seulement pour un historique identique
    let key = sequence_key(&draws);
    let diagnostics = match (&base.backtest.final_diagnostics, &base.backtest.final_history_key) {
        (Some(d), Some(k)) if *k == key => d.clone(),
        _ => cache.get(&draws),
    };
    if diagnostics.pool_size != base.pool_size {
        bail!(
            "prédiction incompatible : format 6/{} enregistré, 6/{} dans l'historique",
            base.pool_size,
            diagnostics.pool_size
        );
    }
    let artifacts =
        build_final_artifacts(&draws, &diagnostics, &base.backtest, settings, &budget, reporter, cancel, &mut cache)?;
    Ok(PredictionOutput {
        sets: artifacts.sets,
        scores: artifacts.scores,
        warning: artifacts.warning,
        bayesian: bayesian_smoothed(&draws, diagnostics.pool_size),
        pool_size: diagnostics.pool_size,
        draw_count: draws.len(),
        backtest: base.backtest.clone(),
        rounds: base.rounds.clone(),
    })
}

/// Profil appris d'une prédiction, prêt à être persisté.
pub fn learned_profile(output: &PredictionOutput) -> &WeightProfile {
    &output.backtest.final_profile
}
