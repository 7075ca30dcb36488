use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use lotto_db::models::{DrawRecord, PICK_COUNT};

/// Boules comptées par tirage dans le modèle binomial (6 + complémentaire).
const BALLS_PER_DRAW: f64 = 7.0;
pub const HOT_COLD_THRESHOLD: f64 = 1.5;
pub const OVERDUE_RATIO: f64 = 1.5;
/// Nombre de créneaux positionnels (7-uplet trié).
pub const POSITION_SLOTS: usize = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberFrequency {
    pub number: u8,
    pub count: u32,
    pub expected: f64,
    pub z_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotColdStatus {
    Hot,
    Cold,
    Neutral,
}

impl std::fmt::Display for HotColdStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotColdStatus::Hot => write!(f, "HOT"),
            HotColdStatus::Cold => write!(f, "COLD"),
            HotColdStatus::Neutral => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotColdEntry {
    pub number: u8,
    pub recent_count: u32,
    pub z_delta: f64,
    pub status: HotColdStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapStat {
    pub number: u8,
    pub current_gap: usize,
    pub average_gap: f64,
    pub overdue: bool,
}

impl GapStat {
    pub fn ratio(&self) -> f64 {
        if self.average_gap > 0.0 {
            self.current_gap as f64 / self.average_gap
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChiSquareResult {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
    pub uniform: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutocorrelationEntry {
    pub number: u8,
    pub lag1: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPatternCount {
    pub pattern: String,
    pub counts: [usize; 4],
    pub frequency: u32,
}

/// Fréquences sur le modèle binomial 7 parmi N.
pub fn compute_frequencies(draws: &[DrawRecord], pool_size: usize) -> Vec<NumberFrequency> {
    let t = draws.len() as f64;
    let p = BALLS_PER_DRAW / pool_size as f64;
    let expected = t * p;
    let std = (t * p * (1.0 - p)).sqrt();

    let mut counts = vec![0u32; pool_size + 1];
    for draw in draws {
        for n in draw.target_balls() {
            if (n as usize) <= pool_size {
                counts[n as usize] += 1;
            }
        }
    }

    (1..=pool_size)
        .map(|n| {
            let count = counts[n];
            let z_score = if std > 0.0 { (count as f64 - expected) / std } else { 0.0 };
            NumberFrequency { number: n as u8, count, expected, z_score }
        })
        .collect()
}

/// Fenêtre récente : un cinquième de l'ère, entre 10 et 30 tirages.
pub fn recent_window(era_len: usize) -> usize {
    (era_len / 5).clamp(10, 30).min(era_len)
}

/// Écart standardisé entre la fréquence récente et le taux historique de chaque numéro.
pub fn compute_hot_cold(
    draws: &[DrawRecord],
    pool_size: usize,
    frequencies: &[NumberFrequency],
) -> Vec<HotColdEntry> {
    let t = draws.len();
    let w = recent_window(t);
    let recent = &draws[t - w..];
    let baseline = BALLS_PER_DRAW / pool_size as f64;

    let mut recent_counts = vec![0u32; pool_size + 1];
    for draw in recent {
        for n in draw.target_balls() {
            if (n as usize) <= pool_size {
                recent_counts[n as usize] += 1;
            }
        }
    }

    frequencies
        .iter()
        .map(|f| {
            let r = recent_counts[f.number as usize];
            let z_delta = if t == 0 || w == 0 {
                0.0
            } else {
                let q = (f.count as f64 / t as f64).min(1.0);
                let spread_rate = if q > 0.0 && q < 1.0 { q } else { baseline };
                let std = (w as f64 * spread_rate * (1.0 - spread_rate)).sqrt();
                if std > 0.0 { (r as f64 - w as f64 * q) / std } else { 0.0 }
            };
            let status = if z_delta > HOT_COLD_THRESHOLD {
                HotColdStatus::Hot
            } else if z_delta < -HOT_COLD_THRESHOLD {
                HotColdStatus::Cold
            } else {
                HotColdStatus::Neutral
            };
            HotColdEntry { number: f.number, recent_count: r, z_delta, status }
        })
        .collect()
}

/// Écart courant et écart moyen entre apparitions (numéros principaux).
pub fn compute_gaps(draws: &[DrawRecord], pool_size: usize) -> Vec<GapStat> {
    let t = draws.len();
    let mut seen: Vec<Vec<usize>> = vec![Vec::new(); pool_size + 1];
    for (i, draw) in draws.iter().enumerate() {
        for &n in &draw.numbers {
            if (n as usize) <= pool_size {
                seen[n as usize].push(i);
            }
        }
    }
    let fallback_avg = pool_size as f64 / PICK_COUNT as f64;

    (1..=pool_size)
        .map(|n| {
            let positions = &seen[n];
            let current_gap = match positions.last() {
                Some(&last) => t - 1 - last,
                None => t,
            };
            let average_gap = if positions.len() >= 2 {
                let span: usize = positions.windows(2).map(|w| w[1] - w[0]).sum();
                span as f64 / (positions.len() - 1) as f64
            } else {
                fallback_avg
            };
            GapStat {
                number: n as u8,
                current_gap,
                average_gap,
                overdue: current_gap as f64 > OVERDUE_RATIO * average_gap,
            }
        })
        .collect()
}

/// Test d'uniformité du χ² sur les numéros principaux, p-valeur de Wilson-Hilferty.
pub fn chi_square_uniformity(draws: &[DrawRecord], pool_size: usize) -> ChiSquareResult {
    let df = pool_size.saturating_sub(1);
    let expected = draws.len() as f64 * PICK_COUNT as f64 / pool_size as f64;
    if expected <= 0.0 {
        return ChiSquareResult { statistic: 0.0, degrees_of_freedom: df, p_value: 1.0, uniform: true };
    }

    let mut counts = vec![0u32; pool_size + 1];
    for draw in draws {
        for &n in &draw.numbers {
            if (n as usize) <= pool_size {
                counts[n as usize] += 1;
            }
        }
    }
    let statistic: f64 = counts[1..]
        .iter()
        .map(|&c| (c as f64 - expected).powi(2) / expected)
        .sum();
    let p_value = wilson_hilferty_p(statistic, df);

    ChiSquareResult { statistic, degrees_of_freedom: df, p_value, uniform: p_value >= 0.05 }
}

/// P(X >= chi) pour X ~ χ²(df), approximation cube-racine de Wilson-Hilferty.
pub fn wilson_hilferty_p(chi: f64, df: usize) -> f64 {
    if df == 0 {
        return 1.0;
    }
    let k = df as f64;
    let var = 2.0 / (9.0 * k);
    let z = ((chi / k).cbrt() - (1.0 - var)) / var.sqrt();
    (1.0 - normal_cdf(z)).clamp(0.0, 1.0)
}

pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t * (0.254_829_592
        + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Seuil de significativité de l'autocorrélation : 2/√T.
pub fn autocorrelation_threshold(t: usize) -> f64 {
    if t == 0 { f64::INFINITY } else { 2.0 / (t as f64).sqrt() }
}

/// Autocorrélation de lag 1 de la série binaire de présence de chaque numéro.
pub fn compute_autocorrelation(draws: &[DrawRecord], pool_size: usize) -> Vec<AutocorrelationEntry> {
    let t = draws.len();
    let threshold = autocorrelation_threshold(t);

    (1..=pool_size as u8)
        .map(|n| {
            let series: Vec<f64> = draws
                .iter()
                .map(|d| if d.contains(n) { 1.0 } else { 0.0 })
                .collect();
            let lag1 = lag1_autocorrelation(&series);
            AutocorrelationEntry { number: n, lag1, significant: lag1.abs() > threshold }
        })
        .collect()
}

fn lag1_autocorrelation(series: &[f64]) -> f64 {
    if series.len() < 3 {
        return 0.0;
    }
    let mean = series.iter().sum::<f64>() / series.len() as f64;
    let denom: f64 = series.iter().map(|x| (x - mean).powi(2)).sum();
    if denom <= 0.0 {
        return 0.0;
    }
    let numer: f64 = series.windows(2).map(|w| (w[0] - mean) * (w[1] - mean)).sum();
    numer / denom
}

/// Largeur d'un quartile de numéros.
pub fn bucket_width(pool_size: usize) -> usize {
    pool_size.div_ceil(4).max(1)
}

pub fn bucket_of(n: u8, pool_size: usize) -> usize {
    ((n as usize).saturating_sub(1) / bucket_width(pool_size)).min(3)
}

pub fn group_counts(numbers: &[u8], pool_size: usize) -> [usize; 4] {
    let mut counts = [0usize; 4];
    for &n in numbers {
        counts[bucket_of(n, pool_size)] += 1;
    }
    counts
}

pub fn pattern_key(counts: &[usize; 4]) -> String {
    format!("{}-{}-{}-{}", counts[0], counts[1], counts[2], counts[3])
}

/// Histogramme des compositions par quartile, du plus fréquent au plus rare.
pub fn compute_group_patterns(draws: &[DrawRecord], pool_size: usize) -> Vec<GroupPatternCount> {
    let mut histogram: BTreeMap<[usize; 4], u32> = BTreeMap::new();
    for draw in draws {
        *histogram.entry(group_counts(&draw.numbers, pool_size)).or_insert(0) += 1;
    }
    let mut patterns: Vec<GroupPatternCount> = histogram
        .into_iter()
        .map(|(counts, frequency)| GroupPatternCount { pattern: pattern_key(&counts), counts, frequency })
        .collect();
    patterns.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.pattern.cmp(&b.pattern)));
    patterns
}

/// Occupation (en %) de chaque rang du 7-uplet trié, par numéro. Forme (7, N+1).
pub fn compute_positional(draws: &[DrawRecord], pool_size: usize) -> Array2<f64> {
    let mut occupancy = Array2::<f64>::zeros((POSITION_SLOTS, pool_size + 1));
    if draws.is_empty() {
        return occupancy;
    }
    for draw in draws {
        let mut tuple: Vec<u8> = draw.target_balls().collect();
        tuple.sort();
        for (slot, &n) in tuple.iter().enumerate().take(POSITION_SLOTS) {
            if (n as usize) <= pool_size {
                occupancy[[slot, n as usize]] += 1.0;
            }
        }
    }
    occupancy *= 100.0 / draws.len() as f64;
    occupancy
}

/// Fréquence relative de chaque écart entre numéros adjacents (indice = écart).
pub fn compute_delta_frequency(draws: &[DrawRecord], pool_size: usize) -> Vec<f64> {
    let mut counts = vec![0u32; pool_size + 1];
    let mut total = 0u32;
    for draw in draws {
        for w in draw.numbers.windows(2) {
            let d = (w[1] - w[0]) as usize;
            if d <= pool_size {
                counts[d] += 1;
                total += 1;
            }
        }
    }
    counts
        .iter()
        .map(|&c| if total > 0 { c as f64 / total as f64 } else { 0.0 })
        .collect()
}

/// Plage « habituelle » de la somme des numéros : moyenne ± 2 écarts-types.
pub fn compute_sum_band(draws: &[DrawRecord], pool_size: usize) -> (f64, f64) {
    if draws.len() < 2 {
        let mid = PICK_COUNT as f64 * (pool_size as f64 + 1.0) / 2.0;
        let half = pool_size as f64 * 1.5;
        return (mid - half, mid + half);
    }
    let sums: Vec<f64> = draws
        .iter()
        .map(|d| d.numbers.iter().map(|&n| n as f64).sum())
        .collect();
    let mean = sums.iter().sum::<f64>() / sums.len() as f64;
    let var = sums.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (sums.len() - 1) as f64;
    let std = var.sqrt();
    (mean - 2.0 * std, mean + 2.0 * std)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotto_db::models::make_test_draws;

    fn draw(date: &str, numbers: [u8; 6], bonus: u8) -> DrawRecord {
        DrawRecord::new(date, numbers, bonus).unwrap()
    }

    #[test]
    fn test_frequencies_count_bonus() {
        let draws = vec![
            draw("2020-01-01", [1, 2, 3, 4, 5, 6], 7),
            draw("2020-01-02", [1, 8, 9, 10, 11, 12], 2),
        ];
        let f = compute_frequencies(&draws, 49);
        assert_eq!(f.len(), 49);
        assert_eq!(f[0].count, 2);
        assert_eq!(f[1].count, 2);
        assert_eq!(f[6].count, 1);
        assert!((f[0].expected - 2.0 * 7.0 / 49.0).abs() < 1e-12);
        assert!(f[0].z_score > 0.0);
        assert!(f[48].z_score < 0.0);
    }

    #[test]
    fn test_gaps_and_overdue() {
        let mut draws = vec![draw("2020-01-01", [1, 2, 3, 4, 5, 6], 0)];
        draws.push(draw("2020-01-02", [1, 2, 3, 4, 5, 7], 0));
        draws.push(draw("2020-01-03", [1, 8, 9, 10, 11, 12], 0));
        for i in 0..10 {
            draws.push(draw(&format!("2020-02-{:02}", i + 1), [20, 21, 22, 23, 24, 25], 0));
        }
        let gaps = compute_gaps(&draws, 49);
        // 2 vu aux indices 0 et 1 : écart moyen 1, écart courant 11
        assert_eq!(gaps[1].current_gap, 11);
        assert!((gaps[1].average_gap - 1.0).abs() < 1e-12);
        assert!(gaps[1].overdue);
        assert_eq!(gaps[19].current_gap, 0);
        assert!(!gaps[19].overdue);
        // jamais vu
        assert_eq!(gaps[48].current_gap, draws.len());
    }

    #[test]
    fn test_chi_square_detects_bias() {
        let mut biased = Vec::new();
        for i in 0..120 {
            biased.push(draw(&format!("d{i}"), [1, 2, 3, 4, 5, 6], 0));
        }
        let chi = chi_square_uniformity(&biased, 49);
        assert!(!chi.uniform);
        assert!(chi.p_value < 1e-6);

        let fair = make_test_draws(400, 49, 11);
        let chi = chi_square_uniformity(&fair, 49);
        assert!(chi.p_value > 0.0 && chi.p_value <= 1.0);
        assert_eq!(chi.degrees_of_freedom, 48);
    }

    #[test]
    fn test_wilson_hilferty_median() {
        // la médiane d'un χ²(k) vaut environ k(1 - 2/9k)^3
        let k = 50usize;
        let median = k as f64 * (1.0 - 2.0 / (9.0 * k as f64)).powi(3);
        assert!((wilson_hilferty_p(median, k) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_autocorrelation_alternating() {
        let mut draws = Vec::new();
        for i in 0..40 {
            let numbers = if i % 2 == 0 { [1, 2, 3, 4, 5, 6] } else { [7, 8, 9, 10, 11, 12] };
            draws.push(draw(&format!("d{i}"), numbers, 0));
        }
        let ac = compute_autocorrelation(&draws, 49);
        assert!(ac[0].lag1 < -0.9);
        assert!(ac[0].significant);
        // jamais tiré : variance nulle
        assert_eq!(ac[40].lag1, 0.0);
        assert!(!ac[40].significant);
    }

    #[test]
    fn test_group_patterns() {
        assert_eq!(bucket_width(49), 13);
        assert_eq!(bucket_of(1, 49), 0);
        assert_eq!(bucket_of(13, 49), 0);
        assert_eq!(bucket_of(14, 49), 1);
        assert_eq!(bucket_of(49, 49), 3);
        let draws = vec![
            draw("a", [1, 14, 15, 27, 40, 41], 0),
            draw("b", [2, 16, 17, 28, 42, 43], 0),
            draw("c", [1, 2, 3, 4, 5, 6], 0),
        ];
        let patterns = compute_group_patterns(&draws, 49);
        assert_eq!(patterns[0].pattern, "1-2-1-2");
        assert_eq!(patterns[0].frequency, 2);
        assert_eq!(patterns[1].pattern, "6-0-0-0");
    }

    #[test]
    fn test_positional_percentages() {
        let draws = vec![draw("a", [1, 2, 3, 4, 5, 6], 7), draw("b", [1, 9, 10, 11, 12, 13], 0)];
        let pos = compute_positional(&draws, 49);
        assert_eq!(pos.dim(), (7, 50));
        assert!((pos[[0, 1]] - 100.0).abs() < 1e-9);
        assert!((pos[[6, 7]] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_hot_cold_detects_recent_surge() {
        let mut draws = make_test_draws(150, 49, 3);
        for d in draws.iter_mut().skip(130) {
            if !d.numbers.contains(&1) && d.bonus != 1 {
                d.numbers[0] = 1;
                d.numbers.sort();
            }
        }
        let f = compute_frequencies(&draws, 49);
        let hc = compute_hot_cold(&draws, 49, &f);
        assert_eq!(hc[0].status, HotColdStatus::Hot, "z = {}", hc[0].z_delta);
    }
}
