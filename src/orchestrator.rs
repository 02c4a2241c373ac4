//! Effect runner: owns the session state and drives runs.
//!
//! The [`Orchestrator`] is the only thing that mutates [`SessionState`]. User
//! actions and run progress both go through [`reduce`]; the orchestrator
//! then performs whatever effects the transition asked for.
//!
//! ## Run execution
//!
//! Each accepted submission spawns one tokio task that walks the
//! [`StageList`] strictly in order: stage N+1 is only sent after stage N's
//! response has been received and parsed. The task reports back over a
//! channel; the orchestrator applies those reports when the caller
//! [`pump`](Orchestrator::pump)s it, so state changes stay on the caller's
//! task.
//!
//! Every run owns a [`CancellationToken`]. Cancelling aborts the in-flight
//! request at the next await point, and any report that still arrives from
//! a superseded run is dropped by the reducer.

use crate::client::ApiClient;
use crate::config::StoryConfig;
use crate::error::StoryError;
use crate::media::{MediaRef, MediaStore};
use crate::model::ModelChoice;
use crate::output::{RunStats, StageTiming};
use crate::pipeline::{MediaPayload, StageInput, StageList, StageOutput};
use crate::progress::{NoopObserver, SharedObserver};
use crate::state::{reduce, Effect, Event, PipelineResult, ResultPatch, RunRequest, RunState, SessionState};
use crate::upload::Attachment;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Report sent from a run task back to the orchestrator.
#[derive(Debug)]
enum RunReport {
    Stage {
        run_id: u64,
        stage: &'static str,
        output: StageOutput,
        duration_ms: u64,
    },
    Finished {
        run_id: u64,
        outcome: Result<(), StoryError>,
    },
}

struct RunHandle {
    cancel: CancellationToken,
    /// The supervising task; it reports a panic in the run as a failure.
    task: JoinHandle<()>,
    /// The task executing the stages.
    stages: AbortHandle,
}

/// Owns one story session: upload, model choice, current run and results.
pub struct Orchestrator {
    state: SessionState,
    stages: StageList,
    client: ApiClient,
    store: MediaStore,
    observer: SharedObserver,
    reports_tx: mpsc::UnboundedSender<RunReport>,
    reports_rx: mpsc::UnboundedReceiver<RunReport>,
    runs: HashMap<u64, RunHandle>,
    updates: watch::Sender<SessionState>,
    stats: RunStats,
    run_started: Option<Instant>,
    last_error: Option<StoryError>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("stages", &self.stages)
            .field("store", &self.store)
            .field("runs", &self.runs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Orchestrator {
    /// Create an orchestrator using the stage list for `config.shape`.
    pub fn new(config: &StoryConfig) -> Result<Self, StoryError> {
        Self::with_stages(config, StageList::for_shape(config.shape))
    }

    /// Create an orchestrator with a custom stage list.
    pub fn with_stages(config: &StoryConfig, stages: StageList) -> Result<Self, StoryError> {
        if stages.is_empty() {
            return Err(StoryError::InvalidConfig("stage list is empty".into()));
        }
        let client = ApiClient::new(config)?;
        let store = MediaStore::new(config.media_dir.as_deref())?;
        let observer: SharedObserver = config
            .observer
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver));
        let state = SessionState::new(config.model_choice.clone());
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let (updates, _) = watch::channel(state.clone());

        debug!("Orchestrator ready: stages {:?}, base {}", stages.names(), client.base_url());

        Ok(Self {
            state,
            stages,
            client,
            store,
            observer,
            reports_tx,
            reports_rx,
            runs: HashMap::new(),
            updates,
            stats: RunStats::default(),
            run_started: None,
            last_error: None,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn result(&self) -> &PipelineResult {
        &self.state.result
    }

    pub fn stages(&self) -> &StageList {
        &self.stages
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn media_store(&self) -> &MediaStore {
        &self.store
    }

    /// Timings of the current (or most recent) run.
    pub fn last_run_stats(&self) -> &RunStats {
        &self.stats
    }

    /// The error that ended the most recent failed run.
    pub fn last_error(&self) -> Option<&StoryError> {
        self.last_error.as_ref()
    }

    /// Stream of state snapshots, starting with the current one.
    pub fn subscribe(&self) -> WatchStream<SessionState> {
        WatchStream::new(self.updates.subscribe())
    }

    // ── User actions ─────────────────────────────────────────────────────

    pub async fn select_image(&mut self, image: Attachment) {
        self.apply(Event::ImageSelected(image)).await;
    }

    pub async fn select_pdf(&mut self, pdf: Attachment) {
        self.apply(Event::PdfSelected(pdf)).await;
    }

    /// Drop the held image and its preview. Allowed mid-run; does not cancel.
    pub async fn delete_image(&mut self) {
        self.apply(Event::ImageDeleted).await;
    }

    /// Drop the held PDF and its preview. Allowed mid-run; does not cancel.
    pub async fn delete_pdf(&mut self) {
        self.apply(Event::PdfDeleted).await;
    }

    pub async fn set_model_choice(&mut self, choice: ModelChoice) {
        self.apply(Event::ModelChanged(choice)).await;
    }

    pub async fn dismiss_notice(&mut self) {
        self.apply(Event::DismissNotice).await;
    }

    /// Submit the current upload. Returns `true` if a run was started.
    pub async fn submit(&mut self) -> bool {
        let before = self.state.last_run_id;
        self.apply(Event::Submit).await;
        self.state.last_run_id != before
    }

    /// Cancel the in-flight run, if any.
    pub async fn cancel(&mut self) {
        self.apply(Event::Cancel).await;
    }

    // ── Driving runs ─────────────────────────────────────────────────────

    /// Wait for and apply the next report from the active run.
    ///
    /// Returns `false` without waiting when no run is in flight.
    pub async fn pump(&mut self) -> bool {
        if !self.state.is_running() {
            return false;
        }
        let Some(report) = self.reports_rx.recv().await else {
            return false;
        };
        self.handle_report(report).await;
        true
    }

    /// Pump until the active run (if any) settles.
    pub async fn wait_idle(&mut self) {
        while self.pump().await {}
    }

    /// Submit and wait for the run to settle.
    pub async fn run(&mut self) -> Result<&PipelineResult, StoryError> {
        if self.state.is_running() {
            return Err(StoryError::Internal("a run is already in progress".into()));
        }
        if !self.submit().await {
            return Err(StoryError::NoImageSelected);
        }
        self.wait_idle().await;
        match &self.state.run_state {
            RunState::Succeeded => Ok(&self.state.result),
            RunState::Failed(reason) => Err(self
                .last_error
                .clone()
                .unwrap_or_else(|| StoryError::Internal(reason.clone()))),
            RunState::Idle | RunState::Running => Err(StoryError::Cancelled),
        }
    }

    async fn handle_report(&mut self, report: RunReport) {
        match report {
            RunReport::Stage {
                run_id,
                stage,
                output,
                duration_ms,
            } => {
                let accepted = self.state.active_run == Some(run_id);
                if accepted {
                    self.stats.stages.push(StageTiming {
                        stage: stage.to_string(),
                        duration_ms,
                    });
                }
                let patch = match self.materialise(output, accepted).await {
                    Ok(patch) => patch,
                    Err(err) => {
                        // Could not store the media: fail the run here.
                        self.cancel_task(run_id);
                        self.finish(run_id, Err(err)).await;
                        return;
                    }
                };
                self.apply(Event::StageCompleted {
                    run_id,
                    stage,
                    patch,
                })
                .await;
            }
            RunReport::Finished { run_id, outcome } => {
                self.runs.remove(&run_id);
                self.finish(run_id, outcome).await;
            }
        }
    }

    async fn finish(&mut self, run_id: u64, outcome: Result<(), StoryError>) {
        let accepted = self.state.active_run == Some(run_id);
        if accepted {
            if let Some(started) = self.run_started.take() {
                self.stats.total_duration_ms = started.elapsed().as_millis() as u64;
            }
            if let Err(ref e) = outcome {
                self.last_error = Some(e.clone());
            }
        }
        self.apply(Event::RunFinished { run_id, outcome }).await;
        if !accepted {
            debug!("Ignored finish of superseded run {}", run_id);
            return;
        }
        match &self.state.run_state {
            RunState::Succeeded => {
                info!(
                    "Run {} succeeded in {}ms",
                    run_id, self.stats.total_duration_ms
                );
                self.observer.on_run_complete(run_id);
            }
            RunState::Failed(reason) => {
                warn!("Run {} failed: {}", run_id, reason);
                self.observer.on_run_failed(run_id, reason);
            }
            _ => {}
        }
    }

    /// Turn a stage output into a state patch, storing binary media.
    ///
    /// Binary media from a run that is no longer active is dropped unstored.
    async fn materialise(
        &self,
        output: StageOutput,
        accepted: bool,
    ) -> Result<ResultPatch, StoryError> {
        let media = match output.media {
            Some(MediaPayload::Binary { bytes, mime_type }) if accepted => {
                Some(self.store.create(&bytes, &mime_type).await?)
            }
            Some(MediaPayload::Binary { .. }) => None,
            Some(MediaPayload::Inline(uri)) => Some(MediaRef::inline(uri)),
            None => None,
        };
        Ok(ResultPatch {
            caption: output.caption,
            story: output.story,
            media,
            evaluation: output.evaluation,
        })
    }

    // ── Reducer plumbing ─────────────────────────────────────────────────

    async fn apply(&mut self, event: Event) {
        let transition = reduce(&self.state, event);
        self.state = transition.state;
        for effect in transition.effects {
            self.perform(effect).await;
        }
        self.updates.send_replace(self.state.clone());
    }

    async fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::StartRun(request) => self.start_run(request),
            Effect::CancelRun(run_id) => {
                info!("Cancelling run {}", run_id);
                self.cancel_task(run_id);
            }
            Effect::Release(media) => self.store.release(&media).await,
            Effect::Notify(notice) => {
                info!("Notice ({:?}): {}", notice.kind, notice.message);
                self.observer.on_notice(&notice.message);
            }
        }
    }

    fn start_run(&mut self, request: RunRequest) {
        let run_id = request.run_id;
        let cancel = CancellationToken::new();
        info!(
            "Starting run {} ({} stages, model '{}', pdf: {})",
            run_id,
            self.stages.len(),
            request.model_choice,
            request.pdf.is_some()
        );

        self.stats = RunStats {
            run_id,
            ..Default::default()
        };
        self.run_started = Some(Instant::now());
        self.last_error = None;
        self.observer.on_run_start(run_id, self.stages.len());

        let inner = tokio::spawn(drive_run(
            self.stages.clone(),
            self.client.clone(),
            request,
            cancel.clone(),
            self.reports_tx.clone(),
            Arc::clone(&self.observer),
        ));
        let stages = inner.abort_handle();
        let task = tokio::spawn(supervise_run(run_id, inner, self.reports_tx.clone()));
        self.runs.insert(
            run_id,
            RunHandle {
                cancel,
                task,
                stages,
            },
        );
    }

    fn cancel_task(&mut self, run_id: u64) {
        // The task still reports `Finished`; the reducer drops it as stale.
        if let Some(handle) = self.runs.remove(&run_id) {
            handle.cancel.cancel();
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for (_, handle) in self.runs.drain() {
            handle.cancel.cancel();
            handle.stages.abort();
            handle.task.abort();
        }
    }
}

/// Wait for a run task and turn a panic inside it into a failed finish.
///
/// `drive_run` sends `Finished` on every normal exit; a panicking stage
/// skips that, so the run would otherwise stay `Running` forever.
async fn supervise_run(
    run_id: u64,
    run: JoinHandle<()>,
    reports: mpsc::UnboundedSender<RunReport>,
) {
    let Err(err) = run.await else {
        return;
    };
    if !err.is_panic() {
        return;
    }
    let reason = panic_message(err);
    warn!("Run {} panicked: {}", run_id, reason);
    let _ = reports.send(RunReport::Finished {
        run_id,
        outcome: Err(StoryError::Internal(format!("stage panicked: {reason}"))),
    });
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Execute one run's stages in order, reporting each completion.
async fn drive_run(
    stages: StageList,
    client: ApiClient,
    request: RunRequest,
    cancel: CancellationToken,
    reports: mpsc::UnboundedSender<RunReport>,
    observer: SharedObserver,
) {
    let run_id = request.run_id;
    let total = stages.len();
    let mut input = StageInput::new(request);

    for (i, stage) in stages.iter().enumerate() {
        if cancel.is_cancelled() {
            let _ = reports.send(RunReport::Finished {
                run_id,
                outcome: Err(StoryError::Cancelled),
            });
            return;
        }

        let name = stage.name();
        observer.on_stage_start(i + 1, total, name);
        let start = Instant::now();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(StoryError::Cancelled),
            r = stage.run(&client, &input) => r,
        };

        match result {
            Ok(output) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!("Run {}: stage '{}' done in {}ms", run_id, name, duration_ms);
                input.absorb(&output);
                observer.on_stage_complete(i + 1, total, name);
                let _ = reports.send(RunReport::Stage {
                    run_id,
                    stage: name,
                    output,
                    duration_ms,
                });
            }
            Err(err) => {
                debug!("Run {}: stage '{}' failed: {}", run_id, name, err);
                let _ = reports.send(RunReport::Finished {
                    run_id,
                    outcome: Err(err),
                });
                return;
            }
        }
    }

    let _ = reports.send(RunReport::Finished {
        run_id,
        outcome: Ok(()),
    });
}
