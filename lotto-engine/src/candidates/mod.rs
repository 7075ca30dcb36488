pub mod echo;
pub mod genetic;
pub mod selection;
pub mod set_score;

use std::collections::HashSet;

use rand::distr::weighted::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::RngExt;
use serde::{Deserialize, Serialize};

use lotto_db::models::DrawRecord;

use crate::budget::RuntimeBudget;
use crate::cache::DiagnosticsCache;
use crate::diagnostics::frequency::{bucket_of, group_counts};
use crate::diagnostics::{FullDiagnostics, HotColdStatus};
use crate::scoring::NumberScore;
use crate::settings::Settings;

pub use selection::select_sequence_focused_top_set;
pub use set_score::SetScorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "Top Composite")]
    TopComposite,
    #[serde(rename = "Group Balanced")]
    GroupBalanced,
    #[serde(rename = "Hot+Overdue")]
    HotOverdue,
    #[serde(rename = "Pair Affinity")]
    PairAffinity,
    #[serde(rename = "Monte Carlo")]
    MonteCarlo,
    #[serde(rename = "Pattern Mimic")]
    PatternMimic,
    #[serde(rename = "Genetic")]
    Genetic,
    #[serde(rename = "Most Overdue")]
    MostOverdue,
    #[serde(rename = "Frequency Leaders")]
    FrequencyLeaders,
    #[serde(rename = "Markov Flow")]
    MarkovFlow,
    #[serde(rename = "Bayesian Top")]
    BayesianTop,
    #[serde(rename = "Cold Reversal")]
    ColdReversal,
    #[serde(rename = "Sliding Window")]
    SlidingWindow,
    #[serde(rename = "Chain Master")]
    ChainMaster,
    #[serde(rename = "Consensus Pick")]
    Consensus,
    #[serde(rename = "Historical Echo")]
    HistoricalEcho,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Method::TopComposite => "Top Composite",
            Method::GroupBalanced => "Group Balanced",
            Method::HotOverdue => "Hot+Overdue",
            Method::PairAffinity => "Pair Affinity",
            Method::MonteCarlo => "Monte Carlo",
            Method::PatternMimic => "Pattern Mimic",
            Method::Genetic => "Genetic",
            Method::MostOverdue => "Most Overdue",
            Method::FrequencyLeaders => "Frequency Leaders",
            Method::MarkovFlow => "Markov Flow",
            Method::BayesianTop => "Bayesian Top",
            Method::ColdReversal => "Cold Reversal",
            Method::SlidingWindow => "Sliding Window",
            Method::ChainMaster => "Chain Master",
            Method::Consensus => "Consensus Pick",
            Method::HistoricalEcho => "Historical Echo",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedSet {
    pub numbers: [u8; 6],
    pub total_score: f64,
    pub group_breakdown: [usize; 4],
    pub relative_lift: f64,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateOptions {
    pub include_monte_carlo: bool,
    pub include_genetic: bool,
    pub include_historical_echo: bool,
    pub include_sliding_window: bool,
    pub monte_carlo_trials: usize,
    pub genetic_generations: usize,
    pub genetic_population: usize,
    pub echo_window_cap: usize,
    pub echo_top_k: usize,
}

impl CandidateOptions {
    /// Toutes les heuristiques demandées par les réglages, budgets calibrés.
    pub fn full(settings: &Settings, budget: &RuntimeBudget) -> Self {
        Self {
            include_monte_carlo: settings.include_monte_carlo,
            include_genetic: settings.include_genetic,
            include_historical_echo: settings.include_historical_echo,
            include_sliding_window: settings.include_sliding_window,
            monte_carlo_trials: budget.monte_carlo_trials,
            genetic_generations: budget.genetic_generations,
            genetic_population: budget.genetic_population,
            echo_window_cap: budget.echo_window_cap,
            echo_top_k: budget.echo_top_k,
        }
    }

    /// Configuration rapide du backtest : aucune heuristique coûteuse.
    pub fn fast(budget: &RuntimeBudget) -> Self {
        Self {
            include_monte_carlo: false,
            include_genetic: false,
            include_historical_echo: false,
            include_sliding_window: false,
            ..Self::full(&Settings::default(), budget)
        }
    }
}

struct Generator<'a> {
    scorer: SetScorer<'a>,
    sets: Vec<PredictedSet>,
    seen: HashSet<[u8; 6]>,
    pool_size: usize,
}

impl Generator<'_> {
    fn add_set(&mut self, numbers: &[u8], method: Method) -> bool {
        if numbers.len() != 6 {
            return false;
        }
        let mut key = [0u8; 6];
        key.copy_from_slice(numbers);
        key.sort();
        if key.windows(2).any(|w| w[0] == w[1]) || key[0] == 0 || key[5] as usize > self.pool_size {
            return false;
        }
        if !self.seen.insert(key) {
            return false;
        }
        let total_score = self.scorer.score(&key);
        self.sets.push(PredictedSet {
            numbers: key,
            total_score,
            group_breakdown: group_counts(&key, self.pool_size),
            relative_lift: 0.0,
            method,
        });
        true
    }
}

/// Complète `picked` avec les meilleurs numéros du classement composite.
fn fill_by_score(mut picked: Vec<u8>, ranked: &[u8]) -> Vec<u8> {
    picked.truncate(6);
    for &n in ranked {
        if picked.len() >= 6 {
            break;
        }
        if !picked.contains(&n) {
            picked.push(n);
        }
    }
    picked
}

fn push_unique(picked: &mut Vec<u8>, n: u8) {
    if picked.len() < 6 && !picked.contains(&n) {
        picked.push(n);
    }
}

/// Génère les grilles candidates de toutes les heuristiques actives, dédupliquées, triées par
/// score décroissant et tronquées à `num_sets`.
pub fn generate_candidate_sets(
    scores: &[NumberScore],
    diagnostics: &FullDiagnostics,
    draws: &[DrawRecord],
    num_sets: usize,
    rng: &mut StdRng,
    options: &CandidateOptions,
    cache: &mut DiagnosticsCache,
) -> Vec<PredictedSet> {
    let n = diagnostics.pool_size;
    let ranked: Vec<u8> = scores.iter().map(|s| s.number).collect();
    if ranked.len() < 6 {
        return Vec::new();
    }
    let mut g = Generator {
        scorer: SetScorer::new(diagnostics, scores),
        sets: Vec::new(),
        seen: HashSet::new(),
        pool_size: n,
    };

    // 1. Top Composite
    g.add_set(&ranked[..6], Method::TopComposite);

    // 2. Group Balanced
    let mut picked = Vec::new();
    for bucket in 0..4 {
        if let Some(&best) = ranked.iter().find(|&&x| bucket_of(x, n) == bucket) {
            picked.push(best);
        }
    }
    g.add_set(&fill_by_score(picked, &ranked), Method::GroupBalanced);

    // 3. Hot+Overdue
    let mut hot: Vec<_> = diagnostics.hot_cold.iter().filter(|h| h.status == HotColdStatus::Hot).collect();
    hot.sort_by(|a, b| b.z_delta.total_cmp(&a.z_delta).then(a.number.cmp(&b.number)));
    let mut picked: Vec<u8> = hot.iter().take(3).map(|h| h.number).collect();
    let mut overdue: Vec<_> = diagnostics.gaps.iter().filter(|g| g.overdue).collect();
    overdue.sort_by(|a, b| b.ratio().total_cmp(&a.ratio()).then(a.number.cmp(&b.number)));
    for gap in overdue {
        push_unique(&mut picked, gap.number);
    }
    g.add_set(&fill_by_score(picked, &ranked), Method::HotOverdue);

    // 4. Pair Affinity
    let mut picked = Vec::new();
    for pair in diagnostics.pairs.iter().take(5) {
        push_unique(&mut picked, pair.a);
        push_unique(&mut picked, pair.b);
    }
    g.add_set(&fill_by_score(picked, &ranked), Method::PairAffinity);

    // 5. Monte Carlo
    if options.include_monte_carlo && options.monte_carlo_trials > 0 {
        if let Some(best) = monte_carlo(&mut g.scorer, diagnostics, scores, options.monte_carlo_trials, rng) {
            g.add_set(&best, Method::MonteCarlo);
        }
    }

    // 6. Pattern Mimic
    if let Some(pattern) = diagnostics.group_patterns.first() {
        let mut picked = Vec::new();
        for (bucket, &want) in pattern.counts.iter().enumerate() {
            for &x in ranked.iter().filter(|&&x| bucket_of(x, n) == bucket).take(want) {
                push_unique(&mut picked, x);
            }
        }
        let picked = fill_by_score(picked, &ranked);
        let mut sorted = picked.clone();
        sorted.sort();
        let common_delta = sorted
            .windows(2)
            .any(|w| diagnostics.delta_frequency.get((w[1] - w[0]) as usize).copied().unwrap_or(0.0) >= 0.05);
        if !common_delta {
            log::debug!("pattern mimic : aucun écart courant dans {:?}", sorted);
        }
        g.add_set(&picked, Method::PatternMimic);
    }

    // 7. Genetic
    if options.include_genetic {
        let pool: Vec<u8> = ranked.iter().take(genetic::GENETIC_POOL).copied().collect();
        if let Some((best, _)) =
            genetic::optimize(&mut g.scorer, &pool, options.genetic_generations, options.genetic_population, rng)
        {
            g.add_set(&best, Method::Genetic);
        }
    }

    // 8. Most Overdue
    let mut by_ratio: Vec<_> = diagnostics.gaps.iter().collect();
    by_ratio.sort_by(|a, b| b.ratio().total_cmp(&a.ratio()).then(a.number.cmp(&b.number)));
    let picked: Vec<u8> = by_ratio.iter().take(6).map(|gap| gap.number).collect();
    g.add_set(&picked, Method::MostOverdue);

    // 9. Frequency Leaders
    let mut by_count: Vec<_> = diagnostics.frequencies.iter().collect();
    by_count.sort_by(|a, b| b.count.cmp(&a.count).then(a.number.cmp(&b.number)));
    let picked: Vec<u8> = by_count.iter().take(6).map(|f| f.number).collect();
    g.add_set(&picked, Method::FrequencyLeaders);

    // 10. Markov Flow
    let last = diagnostics.last_numbers().to_vec();
    if let Some(lag1) = diagnostics.lag1() {
        let mut inflow: Vec<(u8, f64)> = (1..=n as u8)
            .map(|b| (b, lag1.inflow(&last, b)))
            .filter(|&(_, p)| p > 0.0)
            .collect();
        inflow.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let picked: Vec<u8> = inflow.iter().take(6).map(|&(b, _)| b).collect();
        g.add_set(&fill_by_score(picked, &ranked), Method::MarkovFlow);
    }

    // 11. Bayesian Top
    let mut by_bayes: Vec<&NumberScore> = scores.iter().collect();
    by_bayes.sort_by(|a, b| b.bayesian.total_cmp(&a.bayesian).then(a.number.cmp(&b.number)));
    let picked: Vec<u8> = by_bayes.iter().take(6).map(|s| s.number).collect();
    g.add_set(&picked, Method::BayesianTop);

    // 12. Cold Reversal
    let mut cold: Vec<_> = diagnostics.hot_cold.iter().filter(|h| h.status == HotColdStatus::Cold).collect();
    cold.sort_by(|a, b| a.z_delta.total_cmp(&b.z_delta).then(a.number.cmp(&b.number)));
    let mut picked: Vec<u8> = cold.iter().take(4).map(|h| h.number).collect();
    let mut neutrals: Vec<u8> = diagnostics
        .hot_cold
        .iter()
        .filter(|h| h.status == HotColdStatus::Neutral)
        .map(|h| h.number)
        .collect();
    neutrals.sort_by_key(|&x| (std::cmp::Reverse(diagnostics.frequency(x).map_or(0, |f| f.count)), x));
    for x in neutrals {
        push_unique(&mut picked, x);
    }
    g.add_set(&fill_by_score(picked, &ranked), Method::ColdReversal);

    // 13. Sliding Window
    if options.include_sliding_window {
        for window in ranked.windows(6) {
            g.add_set(window, Method::SlidingWindow);
        }
    }

    // 14. Chain Master
    if let Some(lag1) = diagnostics.lag1() {
        let mut chain: Vec<u8> = Vec::new();
        for &a in &last {
            if chain.len() >= 6 {
                break;
            }
            let Some(b) = lag1.successors(a).into_iter().map(|(b, _)| b).find(|b| !chain.contains(b)) else {
                continue;
            };
            chain.push(b);
            if let Some(c) = lag1.successors(b).into_iter().map(|(c, _)| c).find(|c| !chain.contains(c)) {
                push_unique(&mut chain, c);
            }
        }
        if chain.len() == 6 {
            g.add_set(&chain, Method::ChainMaster);
        }
    }

    // 15. Consensus Pick
    let mut appearances = vec![0usize; n + 1];
    for set in &g.sets {
        for &x in &set.numbers {
            appearances[x as usize] += 1;
        }
    }
    let mut consensus: Vec<(u8, f64)> = scores
        .iter()
        .map(|s| (s.number, 10.0 * appearances[s.number as usize] as f64 + s.composite_score))
        .collect();
    consensus.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let picked: Vec<u8> = consensus.iter().take(6).map(|&(x, _)| x).collect();
    g.add_set(&picked, Method::Consensus);

    // 16. Historical Echo
    if options.include_historical_echo {
        if let Some(picked) = echo::historical_echo(draws, &ranked, cache, options.echo_window_cap, options.echo_top_k) {
            g.add_set(&picked, Method::HistoricalEcho);
        }
    }

    let mut sets = g.sets;
    sort_sets(&mut sets);
    sets.truncate(num_sets);
    recompute_lift(&mut sets);
    sets
}

pub fn sort_sets(sets: &mut [PredictedSet]) {
    sets.sort_by(|a, b| b.total_score.total_cmp(&a.total_score).then(a.numbers.cmp(&b.numbers)));
}

/// Lift relatif : score / meilleur score du lot.
pub fn recompute_lift(sets: &mut [PredictedSet]) {
    let best = sets.iter().map(|s| s.total_score).fold(f64::NEG_INFINITY, f64::max);
    for s in sets.iter_mut() {
        s.relative_lift = if best > 0.0 && best.is_finite() { s.total_score / best } else { 0.0 };
    }
}

/// Tirage pondéré sans remise proportionnel au score composite, 30 % des essais amorcés par
/// un des 5 meilleurs triplets. Arrêt anticipé après une longue série sans amélioration.
fn monte_carlo(
    scorer: &mut SetScorer<'_>,
    diagnostics: &FullDiagnostics,
    scores: &[NumberScore],
    trials: usize,
    rng: &mut StdRng,
) -> Option<Vec<u8>> {
    let numbers: Vec<u8> = scores.iter().map(|s| s.number).collect();
    let weights: Vec<f64> = scores.iter().map(|s| s.composite_score.max(0.0) + 1e-6).collect();
    let dist = match WeightedIndex::new(&weights) {
        Ok(d) => d,
        Err(e) => {
            log::warn!("monte carlo ignoré : {e}");
            return None;
        }
    };
    let seeds: Vec<&Vec<u8>> = diagnostics.triples.iter().take(5).map(|t| &t.numbers).collect();
    let patience = 1_200usize.max(trials / 5);

    let mut best: Option<([u8; 6], f64)> = None;
    let mut since_improvement = 0usize;
    for trial in 0..trials {
        let mut picked: Vec<u8> = Vec::with_capacity(6);
        if !seeds.is_empty() && rng.random::<f64>() < 0.3 {
            picked.extend(seeds[rng.random_range(0..seeds.len())].iter().copied());
        }
        while picked.len() < 6 {
            let x = numbers[dist.sample(rng)];
            if !picked.contains(&x) {
                picked.push(x);
            }
        }
        if set_score::odd_even_extreme(&picked) {
            continue;
        }
        picked.sort();
        let mut key = [0u8; 6];
        key.copy_from_slice(&picked);
        let s = scorer.score(&key);
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((key, s));
            since_improvement = 0;
        } else {
            since_improvement += 1;
        }
        if trial as f64 > 0.35 * trials as f64 && since_improvement >= patience {
            log::debug!("monte carlo : arrêt anticipé à l'essai {trial}/{trials}");
            break;
        }
    }
    best.map(|(k, _)| k.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::run_full_diagnostics;
    use crate::profiles::preset_profiles;
    use crate::rng::seeded_rng;
    use crate::scoring::composite_scoring;
    use lotto_db::models::make_test_draws;

    fn budget() -> RuntimeBudget {
        let mut b = RuntimeBudget::calibrate(150, &Settings::default());
        b.monte_carlo_trials = 2_000;
        b.genetic_generations = 10;
        b.genetic_population = 30;
        b.echo_window_cap = 24;
        b
    }

    fn generate(options: &CandidateOptions, num_sets: usize, salt: &str) -> Vec<PredictedSet> {
        let draws = make_test_draws(150, 49, 31);
        let diag = run_full_diagnostics(&draws);
        let scores = composite_scoring(&diag, &draws, &preset_profiles()[0]).unwrap();
        let mut cache = DiagnosticsCache::new(64);
        let mut rng = seeded_rng(&["candidates", salt]);
        generate_candidate_sets(&scores, &diag, &draws, num_sets, &mut rng, options, &mut cache)
    }

    #[test]
    fn test_sets_valid_sorted_unique() {
        let options = CandidateOptions::full(&Settings::default(), &budget());
        let sets = generate(&options, 14, "a");
        assert!(!sets.is_empty() && sets.len() <= 14);
        let mut keys = HashSet::new();
        for s in &sets {
            assert!(s.numbers.windows(2).all(|w| w[0] < w[1]));
            assert!(s.numbers.iter().all(|&x| (1..=49).contains(&x)));
            assert!(keys.insert(s.numbers));
            assert_eq!(s.group_breakdown.iter().sum::<usize>(), 6);
        }
        assert!(sets.windows(2).all(|w| w[0].total_score >= w[1].total_score));
        assert!((sets[0].relative_lift - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_deterministic_given_rng() {
        let options = CandidateOptions::full(&Settings::default(), &budget());
        assert_eq!(generate(&options, 14, "same"), generate(&options, 14, "same"));
    }

    #[test]
    fn test_fast_options_skip_expensive_methods() {
        let options = CandidateOptions::fast(&budget());
        let sets = generate(&options, 50, "fast");
        assert!(sets.iter().all(|s| !matches!(
            s.method,
            Method::MonteCarlo | Method::Genetic | Method::SlidingWindow | Method::HistoricalEcho
        )));
    }

    #[test]
    fn test_sliding_window_adds_many() {
        let mut options = CandidateOptions::fast(&budget());
        options.include_sliding_window = true;
        let sets = generate(&options, 100, "slide");
        assert!(sets.iter().filter(|s| s.method == Method::SlidingWindow).count() > 20);
    }

    #[test]
    fn test_method_labels() {
        assert_eq!(Method::HotOverdue.to_string(), "Hot+Overdue");
        assert_eq!(serde_json::to_string(&Method::Consensus).unwrap(), "\"Consensus Pick\"");
    }
}
