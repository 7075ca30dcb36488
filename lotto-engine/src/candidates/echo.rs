use std::collections::BTreeMap;

use lotto_db::models::DrawRecord;

use crate::cache::DiagnosticsCache;
use crate::diagnostics::FullDiagnostics;

pub const ECHO_WINDOW: usize = 50;
const MAX_DISTANCE: f64 = 3.0;
const CHI_SCALE: f64 = 20.0;

/// Signature à 4 dimensions d'une fenêtre d'historique.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoProfile {
    pub chi: f64,
    pub autocorrelated: f64,
    pub hot: f64,
    pub overdue: f64,
}

impl EchoProfile {
    pub fn of(d: &FullDiagnostics) -> Self {
        Self {
            chi: d.chi_square.statistic / CHI_SCALE,
            autocorrelated: d.autocorrelation.iter().filter(|a| a.significant).count() as f64,
            hot: d.hot_numbers().len() as f64,
            overdue: d.overdue_numbers().len() as f64,
        }
    }

    pub fn distance(&self, other: &Self) -> f64 {
        ((self.chi - other.chi).powi(2)
            + (self.autocorrelated - other.autocorrelated).powi(2)
            + (self.hot - other.hot).powi(2)
            + (self.overdue - other.overdue).powi(2))
        .sqrt()
    }
}

/// Cherche les fenêtres passées dont le profil ressemble au présent et renvoie les numéros
/// tirés juste après les plus proches, complétés par le classement composite.
pub fn historical_echo(
    draws: &[DrawRecord],
    ranked: &[u8],
    cache: &mut DiagnosticsCache,
    window_cap: usize,
    top_k: usize,
) -> Option<Vec<u8>> {
    let t = draws.len();
    if t <= ECHO_WINDOW || top_k == 0 {
        return None;
    }
    let current = EchoProfile::of(&cache.get(&draws[t - ECHO_WINDOW..]));

    let starts = t - ECHO_WINDOW;
    let stride = starts.div_ceil(window_cap.max(1)).max(1);
    let mut matches: Vec<(f64, usize)> = Vec::new();
    for start in (0..starts).step_by(stride) {
        let window = &draws[start..start + ECHO_WINDOW];
        let profile = EchoProfile::of(&cache.get(window));
        let distance = profile.distance(&current);
        if distance < MAX_DISTANCE {
            matches.push((distance, start + ECHO_WINDOW));
        }
    }
    if matches.is_empty() {
        return None;
    }
    matches.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    matches.truncate(top_k);

    let rank_of = |n: u8| ranked.iter().position(|&r| r == n).unwrap_or(usize::MAX);
    let mut votes: BTreeMap<u8, usize> = BTreeMap::new();
    for &(_, next) in &matches {
        for &n in &draws[next].numbers {
            *votes.entry(n).or_insert(0) += 1;
        }
    }
    let mut echoed: Vec<(u8, usize)> = votes.into_iter().collect();
    echoed.sort_by(|a, b| b.1.cmp(&a.1).then(rank_of(a.0).cmp(&rank_of(b.0))).then(a.0.cmp(&b.0)));

    let mut picked: Vec<u8> = echoed.into_iter().map(|(n, _)| n).take(6).collect();
    for &n in ranked {
        if picked.len() >= 6 {
            break;
        }
        if !picked.contains(&n) {
            picked.push(n);
        }
    }
    log::debug!("écho historique : {} fenêtre(s) proches, pas {}", matches.len(), stride);
    (picked.len() == 6).then_some(picked)
}
