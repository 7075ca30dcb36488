use serde::{Deserialize, Serialize};

use lotto_db::models::DrawRecord;

use super::frequency::{AutocorrelationEntry, ChiSquareResult, GapStat, HotColdEntry, HotColdStatus};

const WINDOW_SHARE: f64 = 0.22;
const MIN_WINDOW: usize = 8;
const MIN_STRIDE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntropyRegime {
    Structured,
    Diffuse,
    Neutral,
}

impl std::fmt::Display for EntropyRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntropyRegime::Structured => write!(f, "structuré"),
            EntropyRegime::Diffuse => write!(f, "diffus"),
            EntropyRegime::Neutral => write!(f, "neutre"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntropyProfile {
    /// Entropie de Shannon normalisée moyenne des fenêtres, dans [0, 1].
    pub entropy: f64,
    pub concentration: f64,
    pub trend: f64,
    pub regime: EntropyRegime,
    pub window_size: usize,
    pub window_entropies: Vec<f64>,
}

impl EntropyProfile {
    fn neutral() -> Self {
        Self {
            entropy: 1.0,
            concentration: 0.0,
            trend: 0.0,
            regime: EntropyRegime::Neutral,
            window_size: 0,
            window_entropies: Vec::new(),
        }
    }
}

fn normalized_entropy(counts: &[u32], pool_size: usize) -> f64 {
    let total: u32 = counts.iter().sum();
    if total == 0 || pool_size < 2 {
        return 1.0;
    }
    let h: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.ln()
        })
        .sum();
    h / (pool_size as f64).ln()
}

fn count_numbers(draws: &[DrawRecord], pool_size: usize) -> Vec<u32> {
    let mut counts = vec![0u32; pool_size + 1];
    for draw in draws {
        for &n in &draw.numbers {
            if (n as usize) <= pool_size {
                counts[n as usize] += 1;
            }
        }
    }
    counts
}

/// Entropie glissante, concentration (Herfindahl normalisé) et régime de l'ère courante.
pub fn compute_entropy(draws: &[DrawRecord], pool_size: usize) -> EntropyProfile {
    let t = draws.len();
    if t == 0 {
        return EntropyProfile::neutral();
    }

    let window = ((t as f64 * WINDOW_SHARE).round() as usize).max(MIN_WINDOW).min(t);
    let stride = (window / 3).max(MIN_STRIDE);

    let mut window_entropies = Vec::new();
    let mut start = 0;
    while start + window <= t {
        let counts = count_numbers(&draws[start..start + window], pool_size);
        window_entropies.push(normalized_entropy(&counts[1..], pool_size));
        start += stride;
    }

    let entropy = window_entropies.iter().sum::<f64>() / window_entropies.len() as f64;
    let trend = if window_entropies.len() >= 2 {
        let half = window_entropies.len() / 2;
        let early = &window_entropies[..half];
        let late = &window_entropies[half..];
        late.iter().sum::<f64>() / late.len() as f64 - early.iter().sum::<f64>() / early.len() as f64
    } else {
        0.0
    };

    let counts = count_numbers(draws, pool_size);
    let total: u32 = counts.iter().sum();
    let concentration = if total > 0 && pool_size > 1 {
        let hhi: f64 = counts[1..].iter().map(|&c| (c as f64 / total as f64).powi(2)).sum();
        let uniform = 1.0 / pool_size as f64;
        ((hhi - uniform) / (1.0 - uniform)).max(0.0)
    } else {
        0.0
    };

    let regime = classify_regime(entropy, concentration, trend);
    log::debug!("entropie {entropy:.4}, concentration {concentration:.4}, tendance {trend:+.4} : {regime}");

    EntropyProfile { entropy, concentration, trend, regime, window_size: window, window_entropies }
}

pub fn classify_regime(entropy: f64, concentration: f64, trend: f64) -> EntropyRegime {
    if entropy <= 0.94 || (trend < 0.0 && concentration >= 0.08) {
        EntropyRegime::Structured
    } else if entropy >= 0.98 && concentration <= 0.05 && trend >= -0.01 {
        EntropyRegime::Diffuse
    } else {
        EntropyRegime::Neutral
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasVerdict {
    pub biased: bool,
    pub reasons: Vec<String>,
}

/// Verdict de biais. Les raisons suivent toujours le même ordre de contrôle.
pub fn bias_verdict(
    chi_square: &ChiSquareResult,
    autocorrelation: &[AutocorrelationEntry],
    gaps: &[GapStat],
    hot_cold: &[HotColdEntry],
    entropy: &EntropyProfile,
) -> BiasVerdict {
    let mut reasons = Vec::new();

    if !chi_square.uniform {
        reasons.push(format!(
            "Distribution non uniforme (χ² = {:.1}, p = {:.4})",
            chi_square.statistic, chi_square.p_value
        ));
    }

    let significant = autocorrelation.iter().filter(|a| a.significant).count();
    if significant > 0 {
        reasons.push(format!("{significant} numéro(s) avec autocorrélation significative"));
    }

    let overdue = gaps.iter().filter(|g| g.overdue).count();
    if !gaps.is_empty() && overdue as f64 > 0.2 * gaps.len() as f64 {
        reasons.push(format!("{overdue}/{} numéros en retard", gaps.len()));
    }

    let hot = hot_cold.iter().filter(|h| h.status == HotColdStatus::Hot).count();
    if hot < 3 {
        reasons.push(format!("Seulement {hot} numéro(s) chaud(s)"));
    }

    if entropy.regime == EntropyRegime::Structured {
        reasons.push(format!("Régime d'entropie structuré (H = {:.3})", entropy.entropy));
    }

    BiasVerdict { biased: !reasons.is_empty(), reasons }
}
