//! Fixed pool of measurement workers.
//!
//! Each worker owns its own complexity cache and builds every lattice it
//! touches, so workers share no mutable state. Batches go in over a
//! per-worker command channel; progress, failures and completed batches come
//! back over one shared event channel in arrival order.

use lifelike_core::MeasurementRecord;
use lifelike_measure::{ComplexityCache, MeasureConfig, measure_rule};
use std::any::Any;
use std::fs::File;
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::SurveyError;

/// Rules assigned to one worker in one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: u64,
    pub rule_ids: Vec<u32>,
}

/// Messages a worker emits while processing batches.
#[derive(Debug)]
pub enum WorkerEvent {
    /// One rule finished.
    Progress {
        worker: usize,
        batch_id: u64,
        rule_id: u32,
        done: usize,
        of: usize,
    },
    /// One rule could not be measured; the rest of the batch continues.
    Error {
        worker: usize,
        batch_id: u64,
        rule_id: u32,
        message: String,
    },
    /// Every rule in the batch was attempted. Failed rules are absent.
    BatchComplete {
        worker: usize,
        batch_id: u64,
        records: Vec<MeasurementRecord>,
    },
}

#[derive(Debug)]
enum WorkerCommand {
    Measure(Batch),
    Shutdown,
}

struct WorkerSlot {
    tx: mpsc::Sender<WorkerCommand>,
    handle: Option<thread::JoinHandle<()>>,
}

/// Worker threads plus their command channels. Dropping the pool shuts every
/// worker down and joins it; in-flight batches finish first.
pub struct WorkerPool {
    workers: Vec<WorkerSlot>,
}

impl WorkerPool {
    /// Spawn `count` workers and wait until each reports ready.
    ///
    /// A worker that fails to initialise, or a pool that is not fully ready
    /// within `startup_timeout`, fails the whole spawn.
    pub fn spawn<M>(
        count: usize,
        measure: &MeasureConfig,
        complexity_table: Option<&Path>,
        startup_timeout: Duration,
        events: &mpsc::Sender<M>,
    ) -> Result<Self, SurveyError>
    where
        M: From<WorkerEvent> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<usize, (usize, String)>>();
        let mut pool = Self {
            workers: Vec::with_capacity(count),
        };

        for index in 0..count {
            let (tx, rx) = mpsc::channel::<WorkerCommand>();
            let worker = Worker {
                index,
                measure: measure.clone(),
                complexity_table: complexity_table.map(Path::to_path_buf),
                events: events.clone(),
            };
            let ready = ready_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("lifelike-survey-worker-{index}"))
                .spawn(move || worker.run(&rx, &ready))
                .map_err(|err| SurveyError::WorkerSpawn {
                    worker: index,
                    reason: err.to_string(),
                })?;
            pool.workers.push(WorkerSlot {
                tx,
                handle: Some(handle),
            });
        }
        drop(ready_tx);

        let deadline = Instant::now() + startup_timeout;
        let mut ready = 0;
        while ready < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match ready_rx.recv_timeout(remaining) {
                Ok(Ok(worker)) => {
                    debug!(worker, "survey worker ready");
                    ready += 1;
                }
                Ok(Err((worker, reason))) => {
                    error!(worker, %reason, "survey worker failed to start");
                    return Err(SurveyError::WorkerStartup { worker, reason });
                }
                Err(_) => {
                    error!(ready, expected = count, "survey workers did not all start");
                    return Err(SurveyError::StartupTimeout {
                        ready,
                        expected: count,
                    });
                }
            }
        }
        info!(workers = count, "survey worker pool ready");
        Ok(pool)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Hand `batch` to `worker`.
    pub fn dispatch(&self, worker: usize, batch: Batch) -> Result<(), SurveyError> {
        let slot = self
            .workers
            .get(worker)
            .ok_or(SurveyError::WorkerLost { worker })?;
        slot.tx
            .send(WorkerCommand::Measure(batch))
            .map_err(|_| SurveyError::WorkerLost { worker })
    }

    /// Whether `worker`'s thread has exited.
    #[must_use]
    pub fn is_finished(&self, worker: usize) -> bool {
        self.workers
            .get(worker)
            .and_then(|slot| slot.handle.as_ref())
            .is_none_or(thread::JoinHandle::is_finished)
    }

    /// Stop every worker after its current batch and join the threads.
    pub fn shutdown(&mut self) {
        for slot in &self.workers {
            let _ = slot.tx.send(WorkerCommand::Shutdown);
        }
        for (index, slot) in self.workers.iter_mut().enumerate() {
            if let Some(handle) = slot.handle.take()
                && let Err(err) = handle.join()
            {
                error!(worker = index, panic = %panic_message(err.as_ref()), "survey worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<M> {
    index: usize,
    measure: MeasureConfig,
    complexity_table: Option<PathBuf>,
    events: mpsc::Sender<M>,
}

impl<M: From<WorkerEvent>> Worker<M> {
    fn run(
        self,
        commands: &mpsc::Receiver<WorkerCommand>,
        ready: &mpsc::Sender<Result<usize, (usize, String)>>,
    ) {
        let mut cache = ComplexityCache::new();
        if let Some(path) = &self.complexity_table
            && let Err(reason) = load_table(&mut cache, path)
        {
            let _ = ready.send(Err((self.index, reason)));
            return;
        }
        if ready.send(Ok(self.index)).is_err() {
            return;
        }

        while let Ok(command) = commands.recv() {
            match command {
                WorkerCommand::Measure(batch) => {
                    if !self.measure_batch(batch, &mut cache) {
                        warn!(worker = self.index, "coordinator gone; survey worker exiting");
                        break;
                    }
                }
                WorkerCommand::Shutdown => break,
            }
        }
    }

    /// Returns `false` once the coordinator has hung up.
    fn measure_batch(&self, batch: Batch, cache: &mut ComplexityCache) -> bool {
        let of = batch.rule_ids.len();
        let mut records = Vec::with_capacity(of);
        for (position, &rule_id) in batch.rule_ids.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                measure_rule(rule_id, &self.measure, cache)
            }));
            let event = match outcome {
                Ok(Ok(record)) => {
                    records.push(record);
                    WorkerEvent::Progress {
                        worker: self.index,
                        batch_id: batch.id,
                        rule_id,
                        done: position + 1,
                        of,
                    }
                }
                Ok(Err(err)) => WorkerEvent::Error {
                    worker: self.index,
                    batch_id: batch.id,
                    rule_id,
                    message: err.to_string(),
                },
                Err(payload) => {
                    let mut message =
                        format!("measurement panicked: {}", panic_message(payload.as_ref()));
                    if let Err(reason) = self.reset_cache(cache) {
                        message.push_str("; complexity table reload failed: ");
                        message.push_str(&reason);
                    }
                    WorkerEvent::Error {
                        worker: self.index,
                        batch_id: batch.id,
                        rule_id,
                        message,
                    }
                }
            };
            if self.events.send(M::from(event)).is_err() {
                return false;
            }
        }
        self.events
            .send(M::from(WorkerEvent::BatchComplete {
                worker: self.index,
                batch_id: batch.id,
                records,
            }))
            .is_ok()
    }
}

impl<M> Worker<M> {
    /// Replace a cache a panic may have left half-written. When the table
    /// cannot be reloaded the worker keeps going on approximate values.
    fn reset_cache(&self, cache: &mut ComplexityCache) -> Result<(), String> {
        *cache = ComplexityCache::new();
        let Some(path) = &self.complexity_table else {
            return Ok(());
        };
        load_table(cache, path).inspect_err(|reason| {
            warn!(
                worker = self.index,
                %reason,
                "complexity table reload failed; using approximate complexities"
            );
        })
    }
}

fn load_table(cache: &mut ComplexityCache, path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|err| format!("{}: {err}", path.display()))?;
    cache
        .load_json(BufReader::new(file))
        .map(|_| ())
        .map_err(|err| format!("{}: {err}", path.display()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
