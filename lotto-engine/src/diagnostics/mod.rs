pub mod entropy;
pub mod format;
pub mod frequency;
pub mod relations;
pub mod transitions;

use ndarray::Array2;
use serde::Serialize;

use lotto_db::models::DrawRecord;

pub use entropy::{BiasVerdict, EntropyProfile, EntropyRegime};
pub use format::{detect_format, FormatDetection, FormatEra};
pub use frequency::{
    AutocorrelationEntry, ChiSquareResult, GapStat, GroupPatternCount, HotColdEntry, HotColdStatus,
    NumberFrequency,
};
pub use relations::{ComboStat, PairStat};
pub use transitions::TransitionTable;

/// Historique maximal retenu pour les analyses de relations (triplets et au-delà).
pub const RELATION_HISTORY_CAP: usize = 600;

/// Instantané immuable de toutes les analyses d'un historique.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullDiagnostics {
    pub pool_size: usize,
    /// Tirages de l'ère courante.
    pub draw_count: usize,
    /// Tirages de la tranche utilisée pour les relations.
    pub relation_draw_count: usize,
    pub eras: Vec<FormatEra>,
    pub frequencies: Vec<NumberFrequency>,
    pub hot_cold: Vec<HotColdEntry>,
    pub pairs: Vec<PairStat>,
    pub triples: Vec<ComboStat>,
    pub quadruples: Vec<ComboStat>,
    pub quintuples: Vec<ComboStat>,
    pub group_patterns: Vec<GroupPatternCount>,
    pub gaps: Vec<GapStat>,
    pub chi_square: ChiSquareResult,
    pub autocorrelation: Vec<AutocorrelationEntry>,
    pub autocorrelation_threshold: f64,
    #[serde(skip)]
    pub positional: Array2<f64>,
    #[serde(skip)]
    pub transitions: Vec<TransitionTable>,
    /// Fréquence relative des écarts entre numéros adjacents d'un tirage.
    #[serde(skip)]
    pub delta_frequency: Vec<f64>,
    pub sum_band: (f64, f64),
    /// Dernier tirage de l'ère, point de départ des transitions.
    pub last_draw: Option<DrawRecord>,
    pub recent_draws: Vec<DrawRecord>,
    pub entropy: EntropyProfile,
    pub bias: BiasVerdict,
}

/// Tirages compatibles avec le plafond courant (toutes ères confondues), 600 au plus.
pub fn relation_slice(draws: &[DrawRecord], pool_size: usize) -> Vec<DrawRecord> {
    let compatible: Vec<&DrawRecord> = draws
        .iter()
        .filter(|d| d.max_value() as usize <= pool_size)
        .collect();
    let skip = compatible.len().saturating_sub(RELATION_HISTORY_CAP);
    compatible.into_iter().skip(skip).cloned().collect()
}

/// Analyse complète d'un historique chronologique. Fonction pure de son entrée.
pub fn run_full_diagnostics(draws: &[DrawRecord]) -> FullDiagnostics {
    let detection = detect_format(draws);
    let n = detection.current_n;
    let era = &detection.current_draws;
    let slice = relation_slice(draws, n);

    let frequencies = frequency::compute_frequencies(era, n);
    let hot_cold = frequency::compute_hot_cold(era, n, &frequencies);
    let gaps = frequency::compute_gaps(era, n);
    let chi_square = frequency::chi_square_uniformity(era, n);
    let autocorrelation = frequency::compute_autocorrelation(era, n);
    let entropy = entropy::compute_entropy(era, n);
    let bias = entropy::bias_verdict(&chi_square, &autocorrelation, &gaps, &hot_cold, &entropy);
    let recent = frequency::recent_window(era.len());

    log::debug!(
        "diagnostics : format 6/{n}, {} tirages d'ère, {} en relations",
        era.len(),
        slice.len()
    );

    FullDiagnostics {
        pool_size: n,
        draw_count: era.len(),
        relation_draw_count: slice.len(),
        pairs: relations::compute_pairs(era, n),
        triples: relations::compute_triples(&slice, n),
        quadruples: relations::compute_quadruples(&slice, n),
        quintuples: relations::compute_quintuples(&slice, n),
        group_patterns: frequency::compute_group_patterns(era, n),
        autocorrelation_threshold: frequency::autocorrelation_threshold(era.len()),
        positional: frequency::compute_positional(&slice, n),
        transitions: transitions::compute_transitions(&slice, n),
        delta_frequency: frequency::compute_delta_frequency(&slice, n),
        sum_band: frequency::compute_sum_band(&slice, n),
        last_draw: era.last().cloned(),
        recent_draws: era[era.len() - recent..].to_vec(),
        eras: detection.eras,
        frequencies,
        hot_cold,
        gaps,
        chi_square,
        autocorrelation,
        entropy,
        bias,
    }
}

impl FullDiagnostics {
    pub fn frequency(&self, n: u8) -> Option<&NumberFrequency> {
        self.frequencies.get((n as usize).checked_sub(1)?)
    }

    pub fn hot_cold_of(&self, n: u8) -> Option<&HotColdEntry> {
        self.hot_cold.get((n as usize).checked_sub(1)?)
    }

    pub fn gap(&self, n: u8) -> Option<&GapStat> {
        self.gaps.get((n as usize).checked_sub(1)?)
    }

    pub fn hot_numbers(&self) -> Vec<u8> {
        self.numbers_with(HotColdStatus::Hot)
    }

    pub fn cold_numbers(&self) -> Vec<u8> {
        self.numbers_with(HotColdStatus::Cold)
    }

    fn numbers_with(&self, status: HotColdStatus) -> Vec<u8> {
        self.hot_cold.iter().filter(|h| h.status == status).map(|h| h.number).collect()
    }

    pub fn overdue_numbers(&self) -> Vec<u8> {
        self.gaps.iter().filter(|g| g.overdue).map(|g| g.number).collect()
    }

    pub fn lag1(&self) -> Option<&TransitionTable> {
        self.transitions.first()
    }

    pub fn last_numbers(&self) -> &[u8] {
        self.last_draw.as_ref().map(|d| &d.numbers[..]).unwrap_or(&[])
    }

    /// Position la plus probable de `n` dans le 7-uplet trié et son occupation en %.
    pub fn dominant_slot(&self, n: u8) -> (usize, f64) {
        let col = n as usize;
        if col >= self.positional.ncols() {
            return (0, 0.0);
        }
        self.positional
            .column(col)
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0.0), |best, (slot, pct)| if pct > best.1 { (slot, pct) } else { best })
    }

    pub fn pattern_frequency(&self, pattern: &str) -> u32 {
        self.group_patterns
            .iter()
            .find(|p| p.pattern == pattern)
            .map_or(0, |p| p.frequency)
    }
}
