use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

use lotto_engine::reporter::{Reporter, RoundSummary, TraceEvent, TracePhase};
use lotto_engine::worker::{TaskEvent, TaskResponse};

/// Barre de progression en pourcentage, alimentée par le moteur.
#[derive(Clone)]
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new() -> Result<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
            )?
            .progress_chars("=> "),
        );
        Ok(Self { bar })
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Relaie une réponse de worker non terminale.
    pub fn forward(&self, response: &TaskResponse) {
        match &response.event {
            TaskEvent::Progress { percent, stage } => self.progress(*percent, stage),
            TaskEvent::Trace(event) => self.trace(event),
            TaskEvent::RoundResult(summary) => self.round(summary),
            _ => {}
        }
    }
}

impl Reporter for BarReporter {
    fn progress(&self, percent: f64, stage: &str) {
        self.bar.set_position(percent.clamp(0.0, 100.0).round() as u64);
        self.bar.set_message(stage.to_string());
    }

    fn trace(&self, event: &TraceEvent) {
        match event.phase {
            TracePhase::BacktestRow => {
                log::debug!(
                    "{} ({}/{}) : {:?} contre {:?}, recouvrement {}",
                    event.date,
                    event.sequence_index + 1,
                    event.sequence_total,
                    event.predicted,
                    event.actual,
                    event.overlap
                );
            }
            TracePhase::MasteryAttempt => {
                let attempts = event.attempts_used.unwrap_or(0);
                let cap = event.attempt_cap.map_or_else(|| "∞".to_string(), |c| c.to_string());
                self.bar.set_message(format!(
                    "Maîtrise {} : tentative {attempts}/{cap}, meilleur {}",
                    event.date,
                    event.best_overlap.unwrap_or(event.overlap)
                ));
            }
        }
    }

    fn round(&self, summary: &RoundSummary) {
        self.bar.println(format!(
            "Tour {} : utilité {:.3}, taux {:.4}, profil {}{}",
            summary.round,
            summary.score,
            summary.model_hit_rate,
            summary.profile_name,
            if summary.improved { " ★" } else { "" }
        ));
    }
}
