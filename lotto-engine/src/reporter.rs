use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracePhase {
    MasteryAttempt,
    BacktestRow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub phase: TracePhase,
    pub sequence_index: usize,
    pub sequence_total: usize,
    pub date: String,
    pub actual: Vec<u8>,
    pub bonus: u8,
    pub predicted: Vec<u8>,
    pub overlap: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_overlap: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_cap: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
    /// Contourne la limitation de fréquence.
    #[serde(skip)]
    pub milestone: bool,
}

/// Bilan d'un tour d'entraînement continu.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub round: u32,
    pub score: f64,
    pub model_hit_rate: f64,
    pub best_overlap: usize,
    pub profile_name: String,
    pub improved: bool,
}

/// Capacité de remontée de progression injectée dans chaque composant.
pub trait Reporter: Send + Sync {
    fn progress(&self, percent: f64, stage: &str);
    fn trace(&self, event: &TraceEvent);
    fn round(&self, _summary: &RoundSummary) {}
}

pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn progress(&self, _percent: f64, _stage: &str) {}
    fn trace(&self, _event: &TraceEvent) {}
}

pub const THROTTLE_INTERVAL: Duration = Duration::from_millis(140);

struct ThrottleState {
    stage: String,
    percent: f64,
    last_progress: Option<Instant>,
    last_trace: Option<Instant>,
}

/// Progression monotone par étape, limitée à un message toutes les 140 ms
/// sauf jalons (changement d'étape, 100 %, traces marquées `milestone`).
pub struct ThrottledReporter<'a> {
    inner: &'a dyn Reporter,
    interval: Duration,
    state: Mutex<ThrottleState>,
}

impl<'a> ThrottledReporter<'a> {
    pub fn new(inner: &'a dyn Reporter) -> Self {
        Self::with_interval(inner, THROTTLE_INTERVAL)
    }

    pub fn with_interval(inner: &'a dyn Reporter, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            state: Mutex::new(ThrottleState {
                stage: String::new(),
                percent: 0.0,
                last_progress: None,
                last_trace: None,
            }),
        }
    }
}

impl Reporter for ThrottledReporter<'_> {
    fn progress(&self, percent: f64, stage: &str) {
        let percent = percent.clamp(0.0, 100.0);
        let emit = {
            let Ok(mut st) = self.state.lock() else { return };
            let now = Instant::now();
            let stage_changed = st.stage != stage;
            // jamais de régression de pourcentage
            let percent = percent.max(st.percent);
            let due = st.last_progress.map_or(true, |t| now.duration_since(t) >= self.interval);
            if stage_changed || due || percent >= 100.0 {
                st.stage = stage.to_string();
                st.percent = percent;
                st.last_progress = Some(now);
                Some(percent)
            } else {
                st.percent = percent;
                None
            }
        };
        if let Some(p) = emit {
            self.inner.progress(p, stage);
        }
    }

    fn trace(&self, event: &TraceEvent) {
        let emit = {
            let Ok(mut st) = self.state.lock() else { return };
            let now = Instant::now();
            let due = st.last_trace.map_or(true, |t| now.duration_since(t) >= self.interval);
            if event.milestone || due {
                st.last_trace = Some(now);
                true
            } else {
                false
            }
        };
        if emit {
            self.inner.trace(event);
        }
    }

    fn round(&self, summary: &RoundSummary) {
        self.inner.round(summary);
    }
}

/// Marqueur d'annulation transporté dans `anyhow::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "calcul annulé")
    }
}

impl std::error::Error for Cancelled {}

pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}

/// Jeton d'annulation coopérative : une époque partagée, monotone, et l'époque capturée
/// au lancement. Le jeton n'est plus courant dès que l'époque partagée avance.
#[derive(Debug, Clone)]
pub struct CancelToken {
    epoch: Arc<AtomicU64>,
    captured: u64,
}

impl CancelToken {
    /// Jeton qui n'est jamais annulé.
    pub fn never() -> Self {
        Self { epoch: Arc::new(AtomicU64::new(0)), captured: 0 }
    }

    pub fn from_epoch(epoch: Arc<AtomicU64>) -> Self {
        let captured = epoch.load(Ordering::SeqCst);
        Self { epoch, captured }
    }

    pub fn is_current(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.captured
    }

    pub fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(Cancelled.into())
        }
    }

    /// Invalide ce jeton et tous ceux capturés sur la même époque.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}
