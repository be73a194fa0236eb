//! Survey coordinator: dispatches batches, aggregates records, checkpoints.
//!
//! The coordinator runs on the thread that calls [`SurveyEngine::run`]. It is
//! the only writer of the session and the checkpoint store; workers and
//! [`SurveyHandle`]s reach it solely through its inbox channel.

use crate::checkpoint::{CheckpointStore, SurveySession};
use crate::config::{SurveyConfig, SurveyError};
use crate::pool::{Batch, WorkerEvent, WorkerPool};
use crate::progress::{SurveyProgress, SurveyState};
use lifelike_core::{MeasurementRecord, NullSink, ResultSink};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the coordinator checks for workers that died mid-batch.
const WORKER_POLL: Duration = Duration::from_millis(250);

/// Whether a run starts from the stored checkpoint or from nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Discard any stored checkpoint.
    Fresh,
    /// Skip every rule the stored checkpoint already completed.
    Resume,
}

/// A rule a worker could not measure. It stays pending for the next run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule_id: u32,
    pub worker: usize,
    pub message: String,
}

/// Callbacks fired on the coordinator thread.
pub trait SurveyObserver: Send {
    fn on_state(&mut self, _state: SurveyState) {}

    /// A worker finished one rule of its batch.
    fn on_rule_progress(&mut self, _worker: usize, _rule_id: u32) {}

    /// A record was accepted into the session.
    fn on_result(&mut self, _record: &MeasurementRecord) {}

    /// Called after every completed batch.
    fn on_progress(&mut self, _progress: &SurveyProgress) {}

    fn on_error(&mut self, _failure: &RuleFailure) {}

    /// Every rule in the configured space is complete.
    fn on_complete(&mut self, _results: &[MeasurementRecord], _elapsed: Duration) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct NullObserver;

impl SurveyObserver for NullObserver {}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct SurveyOutcome {
    /// `Completed`, or `Idle` after a stop or with failed rules outstanding.
    pub state: SurveyState,
    pub progress: SurveyProgress,
    pub completed_this_run: usize,
    pub failures: Vec<RuleFailure>,
    pub elapsed: Duration,
}

#[derive(Debug)]
enum Control {
    Pause,
    Resume,
    Stop,
}

#[derive(Debug)]
enum Message {
    Worker(WorkerEvent),
    Control(Control),
}

impl From<WorkerEvent> for Message {
    fn from(event: WorkerEvent) -> Self {
        Message::Worker(event)
    }
}

#[derive(Debug, Default)]
struct Status {
    state: SurveyState,
    progress: SurveyProgress,
}

/// Cloneable remote control for a survey. Commands sent while no run is
/// active are discarded when the next run starts.
#[derive(Clone)]
pub struct SurveyHandle {
    tx: mpsc::Sender<Message>,
    status: Arc<Mutex<Status>>,
}

impl SurveyHandle {
    /// Stop assigning new batches; in-flight batches finish normally.
    pub fn pause(&self) -> bool {
        self.send(Control::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(Control::Resume)
    }

    /// Stop dispatching, wait for in-flight batches, save a checkpoint and
    /// return to idle.
    pub fn stop(&self) -> bool {
        self.send(Control::Stop)
    }

    #[must_use]
    pub fn state(&self) -> SurveyState {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    #[must_use]
    pub fn progress(&self) -> SurveyProgress {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .progress
            .clone()
    }

    fn send(&self, control: Control) -> bool {
        self.tx.send(Message::Control(control)).is_ok()
    }
}

/// Per-run bookkeeping owned by the coordinator loop.
struct RunState {
    state: SurveyState,
    stopping: bool,
    started: Instant,
    /// Rule ids currently assigned to each worker.
    in_flight: Vec<Option<Vec<u32>>>,
    next_batch_id: u64,
    /// Completed rules inside the rule space, restored ones included.
    completed: usize,
    completed_this_run: usize,
    since_checkpoint: usize,
    failures: Vec<RuleFailure>,
}

impl RunState {
    fn busy(&self) -> bool {
        self.in_flight.iter().any(Option::is_some)
    }
}

/// Runs a survey over the configured rule space.
pub struct SurveyEngine<C: CheckpointStore> {
    config: SurveyConfig,
    checkpoints: C,
    session: SurveySession,
    sink: Box<dyn ResultSink>,
    observer: Box<dyn SurveyObserver>,
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    status: Arc<Mutex<Status>>,
}

impl<C: CheckpointStore> SurveyEngine<C> {
    pub fn new(config: SurveyConfig, checkpoints: C) -> Result<Self, SurveyError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            config,
            checkpoints,
            session: SurveySession::new(),
            sink: Box::new(NullSink),
            observer: Box::new(NullObserver),
            tx,
            rx,
            status: Arc::new(Mutex::new(Status::default())),
        })
    }

    /// Forward each batch of newly accepted records to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: impl ResultSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl SurveyObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    #[must_use]
    pub fn handle(&self) -> SurveyHandle {
        SurveyHandle {
            tx: self.tx.clone(),
            status: Arc::clone(&self.status),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    /// Results accumulated by the last run, including restored ones.
    #[must_use]
    pub fn session(&self) -> &SurveySession {
        &self.session
    }

    #[must_use]
    pub fn checkpoint_store(&self) -> &C {
        &self.checkpoints
    }

    pub fn into_checkpoint_store(self) -> C {
        self.checkpoints
    }

    #[must_use]
    pub fn state(&self) -> SurveyState {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    /// Run the survey until every rule is done, a stop is requested, or a
    /// worker is lost. Blocks the calling thread.
    pub fn run(&mut self, mode: StartMode) -> Result<SurveyOutcome, SurveyError> {
        let started = Instant::now();
        self.discard_stale_messages();

        let pool = WorkerPool::spawn(
            self.config.worker_count,
            &self.config.measure,
            self.config.complexity_table.as_deref(),
            self.config.startup_timeout(),
            &self.tx,
        )?;

        self.session = match mode {
            StartMode::Resume => SurveySession::restore(&self.checkpoints),
            StartMode::Fresh => {
                if let Err(err) = self.checkpoints.clear() {
                    warn!(error = %err, "failed to clear survey checkpoint");
                }
                SurveySession::new()
            }
        };

        let space = self.config.rule_space;
        let mut pending = self.session.remaining(space);
        info!(
            remaining = pending.len(),
            total = space.len(),
            workers = pool.len(),
            batch_size = self.config.batch_size,
            "survey started"
        );

        let mut run = RunState {
            state: SurveyState::Running,
            stopping: false,
            started,
            in_flight: vec![None; pool.len()],
            next_batch_id: 0,
            completed: self.session.completed_in(space),
            completed_this_run: 0,
            since_checkpoint: 0,
            failures: Vec::new(),
        };
        self.enter(&mut run, SurveyState::Running);

        loop {
            if run.state == SurveyState::Running && !run.stopping {
                for worker in 0..pool.len() {
                    if pending.is_empty() {
                        break;
                    }
                    if run.in_flight[worker].is_some() {
                        continue;
                    }
                    let take = self.config.batch_size.min(pending.len());
                    let rule_ids: Vec<u32> = pending.drain(..take).collect();
                    let batch = Batch {
                        id: run.next_batch_id,
                        rule_ids: rule_ids.clone(),
                    };
                    run.next_batch_id += 1;
                    if let Err(err) = pool.dispatch(worker, batch) {
                        self.abort(&mut run);
                        return Err(err);
                    }
                    debug!(worker, rules = rule_ids.len(), "dispatched batch");
                    run.in_flight[worker] = Some(rule_ids);
                }
            }

            if !run.busy() && (run.stopping || pending.is_empty()) {
                break;
            }

            match self.rx.recv_timeout(WORKER_POLL) {
                Ok(Message::Worker(event)) => self.on_worker_event(&mut run, event),
                Ok(Message::Control(control)) => self.on_control(&mut run, control),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    let lost = (0..pool.len())
                        .find(|&worker| run.in_flight[worker].is_some() && pool.is_finished(worker));
                    if let Some(worker) = lost {
                        warn!(worker, "survey worker exited with a batch in flight");
                        self.abort(&mut run);
                        return Err(SurveyError::WorkerLost { worker });
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        drop(pool);

        let elapsed = started.elapsed();
        let completed = self.session.completed_in(space);
        let final_state = if completed >= space.len() {
            SurveyState::Completed
        } else {
            SurveyState::Idle
        };
        self.session.save_to(&mut self.checkpoints);
        self.sink.flush();
        let progress = self.enter(&mut run, final_state);

        if final_state == SurveyState::Completed {
            info!(
                rules = self.session.results().len(),
                elapsed_secs = elapsed.as_secs_f64(),
                "survey complete"
            );
            self.observer.on_complete(self.session.results(), elapsed);
        } else {
            info!(
                completed,
                total = space.len(),
                failed = run.failures.len(),
                "survey stopped"
            );
        }

        Ok(SurveyOutcome {
            state: final_state,
            progress,
            completed_this_run: run.completed_this_run,
            failures: run.failures,
            elapsed,
        })
    }

    fn on_worker_event(&mut self, run: &mut RunState, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress {
                worker, rule_id, ..
            } => {
                self.observer.on_rule_progress(worker, rule_id);
            }
            WorkerEvent::Error {
                worker,
                rule_id,
                message,
                ..
            } => {
                warn!(worker, rule_id, %message, "rule measurement failed");
                let failure = RuleFailure {
                    rule_id,
                    worker,
                    message,
                };
                self.observer.on_error(&failure);
                run.failures.push(failure);
            }
            WorkerEvent::BatchComplete {
                worker,
                batch_id,
                records,
            } => {
                if let Some(slot) = run.in_flight.get_mut(worker) {
                    *slot = None;
                }
                let fresh: Vec<MeasurementRecord> = records
                    .into_iter()
                    .filter(|record| !self.session.is_completed(record.rule_id))
                    .collect();
                debug!(worker, batch_id, records = fresh.len(), "batch complete");

                self.sink.on_batch(&fresh);
                for record in &fresh {
                    self.observer.on_result(record);
                }
                let accepted = fresh.len();
                for record in fresh {
                    self.session.record(record);
                }
                run.completed += accepted;
                run.completed_this_run += accepted;
                run.since_checkpoint += accepted;

                if run.since_checkpoint >= self.config.checkpoint_interval {
                    self.session.save_to(&mut self.checkpoints);
                    run.since_checkpoint = 0;
                }
                let progress = self.publish(run);
                self.observer.on_progress(&progress);
            }
        }
    }

    fn on_control(&mut self, run: &mut RunState, control: Control) {
        match control {
            Control::Pause if run.state == SurveyState::Running => {
                info!("survey paused");
                self.enter(run, SurveyState::Paused);
            }
            Control::Resume if run.state == SurveyState::Paused => {
                info!("survey resumed");
                self.enter(run, SurveyState::Running);
            }
            Control::Stop => {
                info!(in_flight = run.in_flight.iter().flatten().count(), "survey stop requested");
                run.stopping = true;
            }
            other => debug!(?other, state = %run.state, "ignored survey control"),
        }
    }

    /// Save what we have and go idle after an unrecoverable worker failure.
    fn abort(&mut self, run: &mut RunState) {
        self.session.save_to(&mut self.checkpoints);
        self.sink.flush();
        self.enter(run, SurveyState::Idle);
    }

    fn enter(&mut self, run: &mut RunState, state: SurveyState) -> SurveyProgress {
        run.state = state;
        let progress = self.publish(run);
        self.observer.on_state(state);
        progress
    }

    fn publish(&self, run: &RunState) -> SurveyProgress {
        let progress = SurveyProgress::compute(
            run.completed,
            run.completed_this_run,
            self.config.total(),
            run.failures.len(),
            run.started.elapsed(),
            run.state,
        );
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.state = run.state;
        status.progress = progress.clone();
        progress
    }

    fn discard_stale_messages(&self) {
        let stale = self.rx.try_iter().count();
        if stale > 0 {
            debug!(stale, "discarded messages from a previous run");
        }
    }
}
