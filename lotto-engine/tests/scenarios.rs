use lotto_db::models::{make_test_draws, DrawRecord};
use lotto_engine::backtest::backtest;
use lotto_engine::cache::DiagnosticsCache;
use lotto_engine::diagnostics::{detect_format, run_full_diagnostics};
use lotto_engine::pipeline::run_prediction;
use lotto_engine::profiles::{preset_profiles, ENSEMBLE_PROFILE_NAME};
use lotto_engine::reporter::{CancelToken, NoopReporter};
use lotto_engine::scoring::{bayesian_smoothed, composite_scoring};
use lotto_engine::settings::{ModelSettings, RoundLimit};

const SCENARIO_SEED: u32 = 0x7f4a7c15;

fn draw(date: &str, numbers: [u8; 6], bonus: u8) -> DrawRecord {
    DrawRecord::new(date, numbers, bonus).unwrap()
}

#[test]
fn test_prediction_is_deterministic() {
    // 72 tirages d'entraînement : balayage et ré-assemblage actifs
    let draws = make_test_draws(90, 49, SCENARIO_SEED);
    let settings = ModelSettings {
        fast_mode: Some(true),
        random_seed_salt: Some("graine".into()),
        ..Default::default()
    }
    .resolve();
    let a = run_prediction(&draws, &settings, &NoopReporter, &CancelToken::never()).unwrap();
    let b = run_prediction(&draws, &settings, &NoopReporter, &CancelToken::never()).unwrap();
    assert_eq!(a.sets[0].numbers, b.sets[0].numbers);
    assert!((a.backtest.model_hit_rate - b.backtest.model_hit_rate).abs() < 1e-12);

    assert_eq!(a.backtest.train_size, 72);
    assert_eq!(a.backtest.sweep.len(), 7);
    assert_eq!(a.backtest.final_profile.name, ENSEMBLE_PROFILE_NAME);
    let sweep_a: Vec<f64> = a.backtest.sweep.iter().map(|s| s.utility).collect();
    let sweep_b: Vec<f64> = b.backtest.sweep.iter().map(|s| s.utility).collect();
    assert_eq!(sweep_a, sweep_b);
}

#[test]
fn test_scores_cover_pool_sorted() {
    let draws = make_test_draws(80, 52, SCENARIO_SEED);
    let diagnostics = run_full_diagnostics(&draws);
    let scores = composite_scoring(&diagnostics, &draws, &preset_profiles()[0]).unwrap();
    assert_eq!(scores.len(), 52);
    assert!(scores.windows(2).all(|w| w[0].composite_score >= w[1].composite_score));
    assert!(scores.iter().all(|s| s.composite_score.is_finite()));
}

#[test]
fn test_degenerate_history() {
    let detection = detect_format(&[]);
    assert_eq!(detection.current_n, 52);
    assert!(detection.current_draws.is_empty());
    assert!(detection.eras.is_empty());

    let result = backtest(&[], 52).unwrap();
    assert_eq!(result.test_size, 0);
    assert_eq!(result.model_hit_rate, 0.0);
}

#[test]
fn test_era_split_on_format_growth() {
    let draws = vec![
        draw("2019-01-01", [1, 5, 12, 23, 34, 49], 7),
        draw("2019-01-04", [2, 6, 13, 24, 35, 44], 8),
        draw("2019-01-08", [3, 7, 14, 25, 36, 58], 9),
        draw("2019-01-11", [4, 8, 15, 26, 37, 41], 10),
    ];
    let detection = detect_format(&draws);
    assert_eq!(detection.eras.len(), 2);
    assert_eq!(detection.eras[0].pool_size, 49);
    assert_eq!((detection.eras[0].start_index, detection.eras[0].end_index), (0, 1));
    assert_eq!(detection.eras[1].pool_size, 58);
    assert_eq!((detection.eras[1].start_index, detection.eras[1].end_index), (2, 3));
    assert_eq!(detection.current_n, 58);
    assert_eq!(detection.current_draws.len(), 2);
}

#[test]
fn test_overlap_counts_bonus_ball() {
    let actual = draw("2024-01-01", [1, 2, 3, 7, 8, 9], 6);
    assert_eq!(actual.overlap(&[1, 2, 3, 4, 5, 6]), 4);
}

#[test]
fn test_cache_distinguishes_sequences() {
    let a = make_test_draws(60, 49, 101);
    let b = make_test_draws(60, 49, 202);
    let mut cache = DiagnosticsCache::new(16);
    let da = cache.get(&a);
    let db = cache.get(&b);
    assert!(!std::sync::Arc::ptr_eq(&da, &db));
    assert_ne!(da.chi_square.statistic, db.chi_square.statistic);
    let again = cache.get(&a);
    assert_eq!(again.chi_square.statistic, da.chi_square.statistic);
    assert_eq!(cache.stats(), (1, 2));
}

#[test]
fn test_bayesian_prefers_recent() {
    let draws = vec![
        draw("2024-01-01", [1, 2, 3, 4, 5, 6], 0),
        draw("2024-01-04", [7, 8, 9, 10, 11, 12], 0),
        draw("2024-01-08", [13, 14, 15, 16, 17, 18], 0),
    ];
    let estimates = bayesian_smoothed(&draws, 49);
    let old = &estimates[0];
    let recent = &estimates[12];
    assert_eq!((old.number, recent.number), (1, 13));
    assert!(recent.weighted_count > old.weighted_count);
}

#[test]
fn test_mastery_caps_hold() {
    let settings = ModelSettings {
        fast_mode: Some(true),
        mastery_backtest_mode: Some(true),
        target_sequence_match: Some(5),
        mastery_max_attempts_per_sequence: Some(RoundLimit::Finite(4)),
        mastery_global_attempt_cap: Some(RoundLimit::Finite(14)),
        include_genetic: Some(false),
        include_historical_echo: Some(false),
        ..Default::default()
    }
    .resolve();
    let draws = make_test_draws(45, 49, SCENARIO_SEED);
    let out = run_prediction(&draws, &settings, &NoopReporter, &CancelToken::never()).unwrap();
    let mastery = out.backtest.mastery.as_ref().unwrap();
    assert!(mastery.total_attempts <= 14);
    assert!(out.backtest.rows.iter().all(|r| r.attempts_used <= 4));
    assert!(mastery.solved_sequences <= out.backtest.test_size);
}
