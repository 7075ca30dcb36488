use std::sync::atomic::AtomicU64;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use lotto_db::models::DrawRecord;

use crate::pipeline::{refresh_prediction_candidates, run_prediction, PredictionOutput};
use crate::reporter::{is_cancelled, CancelToken, Reporter, RoundSummary, ThrottledReporter, TraceEvent};
use crate::settings::ModelSettings;

/// Silence maximal toléré d'un worker avant repli en ligne.
pub const CHECKPOINT_TIMEOUT: Duration = Duration::from_millis(4_500);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Predict {
        draws: Vec<DrawRecord>,
        settings: ModelSettings,
    },
    RefreshCandidates {
        draws: Vec<DrawRecord>,
        base_prediction: Box<PredictionOutput>,
        settings: ModelSettings,
    },
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub request_id: u64,
    pub kind: TaskKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    Progress { percent: f64, stage: String },
    Trace(TraceEvent),
    RoundResult(RoundSummary),
    RefreshResult(Box<PredictionOutput>),
    Result(Box<PredictionOutput>),
    Error { message: String },
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskEvent::Result(_) | TaskEvent::RefreshResult(_) | TaskEvent::Error { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub request_id: u64,
    pub event: TaskEvent,
}

/// Reporter qui transforme chaque remontée en réponse étiquetée. Muet dès que le jeton
/// n'est plus courant.
pub struct ChannelReporter {
    request_id: u64,
    tx: Sender<TaskResponse>,
    cancel: CancelToken,
}

impl ChannelReporter {
    pub fn new(request_id: u64, tx: Sender<TaskResponse>, cancel: CancelToken) -> Self {
        Self { request_id, tx, cancel }
    }

    fn send(&self, event: TaskEvent) {
        if self.cancel.is_current() {
            // récepteur parti : la requête a été abandonnée
            let _ = self.tx.send(TaskResponse { request_id: self.request_id, event });
        }
    }
}

impl Reporter for ChannelReporter {
    fn progress(&self, percent: f64, stage: &str) {
        self.send(TaskEvent::Progress { percent, stage: stage.to_string() });
    }

    fn trace(&self, event: &TraceEvent) {
        self.send(TaskEvent::Trace(event.clone()));
    }

    fn round(&self, summary: &RoundSummary) {
        self.send(TaskEvent::RoundResult(summary.clone()));
    }
}

type Sink<'a> = &'a mut (dyn FnMut(&TaskResponse) + Send);

/// Reporter du chemin en ligne : appelle directement le consommateur.
struct SinkReporter<'a> {
    request_id: u64,
    sink: Mutex<Sink<'a>>,
}

impl SinkReporter<'_> {
    fn emit(&self, event: TaskEvent) {
        if let Ok(mut sink) = self.sink.lock() {
            (*sink)(&TaskResponse { request_id: self.request_id, event });
        }
    }
}

impl Reporter for SinkReporter<'_> {
    fn progress(&self, percent: f64, stage: &str) {
        self.emit(TaskEvent::Progress { percent, stage: stage.to_string() });
    }

    fn trace(&self, event: &TraceEvent) {
        self.emit(TaskEvent::Trace(event.clone()));
    }

    fn round(&self, summary: &RoundSummary) {
        self.emit(TaskEvent::RoundResult(summary.clone()));
    }
}

/// Exécute une requête. `None` si elle a été annulée : rien ne doit être publié.
pub fn execute(request: &TaskRequest, reporter: &dyn Reporter, cancel: &CancelToken) -> Option<TaskEvent> {
    let outcome = match &request.kind {
        TaskKind::Predict { draws, settings } => {
            run_prediction(draws, &settings.resolve(), reporter, cancel).map(|out| TaskEvent::Result(Box::new(out)))
        }
        TaskKind::RefreshCandidates { draws, base_prediction, settings } => {
            refresh_prediction_candidates(draws, base_prediction, &settings.resolve(), reporter, cancel)
                .map(|out| TaskEvent::RefreshResult(Box::new(out)))
        }
        TaskKind::Cancel => return None,
    };
    match outcome {
        Ok(event) if cancel.is_current() => Some(event),
        Ok(_) => None,
        Err(e) if is_cancelled(&e) || !cancel.is_current() => {
            log::debug!("requête {} annulée", request.request_id);
            None
        }
        Err(e) => {
            log::error!("requête {} en échec : {e:#}", request.request_id);
            Some(TaskEvent::Error {
                message: format!("Échec du calcul : {e}. Consultez les journaux (RUST_LOG=debug) pour le détail."),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorStatus {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
    /// Worker muet, calcul refait sur le fil appelant.
    FellBack,
}

impl std::fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SupervisorStatus::Idle => "inactif",
            SupervisorStatus::Running => "en cours",
            SupervisorStatus::Completed => "terminé",
            SupervisorStatus::Stopped => "arrêté",
            SupervisorStatus::Failed => "échec",
            SupervisorStatus::FellBack => "terminé en ligne",
        };
        write!(f, "{label}")
    }
}

/// Poignée d'annulation utilisable depuis un autre fil.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicU64>);

impl CancelHandle {
    pub fn cancel(&self) {
        CancelToken::from_epoch(self.0.clone()).cancel();
    }
}

/// Lance les calculs sur un fil dédié, relaie les réponses de la requête courante et
/// refait le calcul en ligne si le fil reste muet trop longtemps.
pub struct Supervisor {
    epoch: Arc<AtomicU64>,
    timeout: Duration,
    status: SupervisorStatus,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_timeout(CHECKPOINT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { epoch: Arc::new(AtomicU64::new(0)), timeout, status: SupervisorStatus::Idle }
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.epoch.clone())
    }

    fn finish(&mut self, event: Option<TaskEvent>, fell_back: bool) -> Option<TaskEvent> {
        self.status = match &event {
            None => SupervisorStatus::Stopped,
            Some(TaskEvent::Error { .. }) => SupervisorStatus::Failed,
            Some(_) if fell_back => SupervisorStatus::FellBack,
            Some(_) => SupervisorStatus::Completed,
        };
        event
    }

    /// Calcul directement sur le fil appelant, même comportement que via le worker.
    pub fn run_inline(&mut self, request: &TaskRequest, sink: Sink<'_>) -> Option<TaskEvent> {
        self.run_inline_inner(request, sink, false)
    }

    fn run_inline_inner(&mut self, request: &TaskRequest, sink: Sink<'_>, fell_back: bool) -> Option<TaskEvent> {
        if matches!(request.kind, TaskKind::Cancel) {
            self.cancel_handle().cancel();
            return self.finish(None, false);
        }
        self.status = SupervisorStatus::Running;
        let token = CancelToken::from_epoch(self.epoch.clone());
        let reporter = SinkReporter { request_id: request.request_id, sink: Mutex::new(sink) };
        let throttled = ThrottledReporter::new(&reporter);
        let event = execute(request, &throttled, &token);
        self.finish(event, fell_back)
    }

    /// Lance la requête sur un fil de travail. Les réponses non terminales passent par
    /// `sink`, l'événement terminal est renvoyé.
    pub fn run(&mut self, request: TaskRequest, sink: Sink<'_>) -> Result<Option<TaskEvent>> {
        if matches!(request.kind, TaskKind::Cancel) {
            self.cancel_handle().cancel();
            return Ok(self.finish(None, false));
        }
        self.status = SupervisorStatus::Running;
        let request_id = request.request_id;
        let token = CancelToken::from_epoch(self.epoch.clone());
        let (tx, rx) = mpsc::channel::<TaskResponse>();

        let worker_request = request.clone();
        let worker_token = token.clone();
        std::thread::Builder::new()
            .name(format!("lotto-worker-{request_id}"))
            .spawn(move || {
                let reporter = ChannelReporter::new(request_id, tx.clone(), worker_token.clone());
                let throttled = ThrottledReporter::new(&reporter);
                if let Some(event) = execute(&worker_request, &throttled, &worker_token) {
                    let _ = tx.send(TaskResponse { request_id, event });
                }
            })
            .context("Impossible de démarrer le fil de calcul")?;

        loop {
            match rx.recv_timeout(self.timeout) {
                Ok(response) if response.request_id != request_id => {
                    log::debug!("réponse périmée ignorée (requête {})", response.request_id);
                }
                Ok(response) if response.event.is_terminal() => {
                    return Ok(self.finish(Some(response.event), false));
                }
                Ok(response) => (*sink)(&response),
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "worker muet depuis {:?} : abandon et reprise en ligne de la requête {request_id}",
                        self.timeout
                    );
                    // le fil abandonné s'arrête à son prochain point de contrôle
                    token.cancel();
                    return Ok(self.run_inline_inner(&request, sink, true));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    if !token.is_current() {
                        return Ok(self.finish(None, false));
                    }
                    log::warn!("worker terminé sans résultat : reprise en ligne de la requête {request_id}");
                    return Ok(self.run_inline_inner(&request, sink, true));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotto_db::models::make_test_draws;

    fn fast_settings() -> ModelSettings {
        ModelSettings {
            fast_mode: Some(true),
            include_genetic: Some(false),
            include_historical_echo: Some(false),
            ..Default::default()
        }
    }

    fn predict(request_id: u64, n: usize) -> TaskRequest {
        TaskRequest {
            request_id,
            kind: TaskKind::Predict { draws: make_test_draws(n, 49, 3), settings: fast_settings() },
        }
    }

    #[test]
    fn test_worker_returns_result() {
        let mut supervisor = Supervisor::new();
        let mut seen = Vec::new();
        let mut sink = |r: &TaskResponse| seen.push(r.request_id);
        let event = supervisor.run(predict(7, 40), &mut sink).unwrap();
        assert!(matches!(event, Some(TaskEvent::Result(_))));
        assert_eq!(supervisor.status(), SupervisorStatus::Completed);
        assert!(seen.iter().all(|&id| id == 7));
    }

    #[test]
    fn test_silent_worker_falls_back_inline() {
        // délai nul : le premier silence déclenche la reprise en ligne
        let mut supervisor = Supervisor::with_timeout(Duration::ZERO);
        let mut sink = |_: &TaskResponse| {};
        let event = supervisor.run(predict(1, 40), &mut sink).unwrap();
        assert!(matches!(event, Some(TaskEvent::Result(_))));
        assert!(matches!(supervisor.status(), SupervisorStatus::FellBack | SupervisorStatus::Completed));
    }

    #[test]
    fn test_inline_matches_worker() {
        let mut sink = |_: &TaskResponse| {};
        let mut a = Supervisor::new();
        let mut b = Supervisor::new();
        let Some(TaskEvent::Result(worker)) = a.run(predict(2, 40), &mut sink).unwrap() else {
            panic!("résultat attendu");
        };
        let Some(TaskEvent::Result(inline)) = b.run_inline(&predict(3, 40), &mut sink) else {
            panic!("résultat attendu");
        };
        assert_eq!(worker.sets[0].numbers, inline.sets[0].numbers);
        assert_eq!(worker.backtest.model_hit_rate, inline.backtest.model_hit_rate);
    }

    #[test]
    fn test_failure_is_reported() {
        let mut supervisor = Supervisor::new();
        let mut sink = |_: &TaskResponse| {};
        let request =
            TaskRequest { request_id: 4, kind: TaskKind::Predict { draws: Vec::new(), settings: fast_settings() } };
        let event = supervisor.run(request, &mut sink).unwrap();
        match event {
            Some(TaskEvent::Error { message }) => assert!(message.contains("journaux")),
            other => panic!("erreur attendue, obtenu {other:?}"),
        }
        assert_eq!(supervisor.status(), SupervisorStatus::Failed);
    }

    #[test]
    fn test_cancel_request_stops() {
        let mut supervisor = Supervisor::new();
        let token = CancelToken::from_epoch(supervisor.epoch.clone());
        let mut sink = |_: &TaskResponse| {};
        let event = supervisor.run(TaskRequest { request_id: 5, kind: TaskKind::Cancel }, &mut sink).unwrap();
        assert!(event.is_none());
        assert_eq!(supervisor.status(), SupervisorStatus::Stopped);
        assert!(!token.is_current());
    }

    #[test]
    fn test_cancelled_execution_publishes_nothing() {
        let token = CancelToken::never();
        token.cancel();
        assert!(execute(&predict(6, 30), &crate::reporter::NoopReporter, &token).is_none());
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let response = TaskResponse {
            request_id: 9,
            event: TaskEvent::Progress { percent: 12.5, stage: "Backtest".into() },
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"requestId\":9"));
        assert!(json.contains("\"type\":\"progress\""));
        let cancel: TaskRequest = serde_json::from_str(r#"{"requestId":3,"kind":{"type":"cancel"}}"#).unwrap();
        assert!(matches!(cancel.kind, TaskKind::Cancel));
    }
}
