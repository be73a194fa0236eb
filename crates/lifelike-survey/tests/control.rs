use lifelike_core::{Boundary, MeasurementRecord, ResultSink};
use lifelike_measure::MeasureConfig;
use lifelike_survey::{
    Checkpoint, CheckpointError, CheckpointStore, MemoryCheckpointStore, RuleSpace, StartMode, SurveyConfig, SurveyEngine, SurveyError,
    SurveyHandle, SurveyObserver, SurveyProgress, SurveyState, to_csv_string,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn small_config(space: RuleSpace) -> SurveyConfig {
    SurveyConfig {
        worker_count: 2,
        batch_size: 10,
        checkpoint_interval: 100,
        rule_space: space,
        measure: MeasureConfig {
            rows: 8,
            cols: 8,
            boundary: Boundary::Wrap,
            steps: 8,
            classification_steps: 32,
            hash_window: 32,
            density: 0.3,
            lambda_trials: 2,
            base_seed: 7,
        },
        complexity_table: None,
        startup_timeout_secs: 30,
    }
}

#[derive(Default)]
struct Timeline {
    states: Vec<SurveyState>,
    batches_while_paused: usize,
    completions: usize,
    completed_results: usize,
}

struct PauseOnce {
    handle: SurveyHandle,
    paused: bool,
    timeline: Arc<Mutex<Timeline>>,
}

impl SurveyObserver for PauseOnce {
    fn on_state(&mut self, state: SurveyState) {
        self.timeline.lock().expect("lock").states.push(state);
    }

    fn on_progress(&mut self, _progress: &SurveyProgress) {
        let mut timeline = self.timeline.lock().expect("lock");
        if timeline.states.last() == Some(&SurveyState::Paused) {
            timeline.batches_while_paused += 1;
        }
        drop(timeline);
        if !self.paused {
            self.paused = true;
            self.handle.pause();
            let handle = self.handle.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                handle.resume();
            });
        }
    }

    fn on_complete(&mut self, results: &[MeasurementRecord], _elapsed: Duration) {
        let mut timeline = self.timeline.lock().expect("lock");
        timeline.completions += 1;
        timeline.completed_results = results.len();
    }
}

#[test]
fn pause_holds_dispatch_until_resumed() {
    let timeline = Arc::new(Mutex::new(Timeline::default()));
    let engine = SurveyEngine::new(small_config(RuleSpace::new(0, 200)), MemoryCheckpointStore::new())
        .expect("engine");
    let handle = engine.handle();
    let mut engine = engine.with_observer(PauseOnce {
        handle: handle.clone(),
        paused: false,
        timeline: Arc::clone(&timeline),
    });

    let outcome = engine.run(StartMode::Fresh).expect("run");
    assert_eq!(outcome.state, SurveyState::Completed);
    assert_eq!(handle.state(), SurveyState::Completed);
    let progress = handle.progress();
    assert_eq!(progress.completed, 200);
    assert!(!progress.is_running);

    let timeline = timeline.lock().expect("lock");
    assert_eq!(
        timeline.states,
        vec![
            SurveyState::Running,
            SurveyState::Paused,
            SurveyState::Running,
            SurveyState::Completed,
        ]
    );
    assert!(
        timeline.batches_while_paused <= 2,
        "only in-flight batches may finish while paused"
    );
    assert_eq!(timeline.completions, 1);
    assert_eq!(timeline.completed_results, 200);
}

#[derive(Clone, Default)]
struct SharedSink {
    ids: Arc<Mutex<Vec<u32>>>,
    flushes: Arc<Mutex<usize>>,
}

impl ResultSink for SharedSink {
    fn on_batch(&mut self, records: &[MeasurementRecord]) {
        self.ids
            .lock()
            .expect("lock")
            .extend(records.iter().map(|r| r.rule_id));
    }

    fn flush(&mut self) {
        *self.flushes.lock().expect("lock") += 1;
    }
}

#[test]
fn sink_receives_every_accepted_record() {
    let sink = SharedSink::default();
    let mut engine = SurveyEngine::new(small_config(RuleSpace::new(500, 620)), MemoryCheckpointStore::new())
        .expect("engine")
        .with_sink(sink.clone());
    engine.run(StartMode::Fresh).expect("run");

    let mut ids = sink.ids.lock().expect("lock").clone();
    ids.sort_unstable();
    assert_eq!(ids, (500..620).collect::<Vec<u32>>());
    assert_eq!(*sink.flushes.lock().expect("lock"), 1);

    let store = engine.checkpoint_store();
    assert!(store.saves() >= 2, "interval saves plus the final save");

    let csv = to_csv_string(engine.session().results());
    assert_eq!(csv.lines().count(), 121);
}

#[test]
fn stop_before_any_batch_completes_saves_empty_progress() {
    let engine = SurveyEngine::new(small_config(RuleSpace::new(0, 50)), MemoryCheckpointStore::new())
        .expect("engine");
    let handle = engine.handle();

    struct StopOnStart(SurveyHandle);
    impl SurveyObserver for StopOnStart {
        fn on_state(&mut self, state: SurveyState) {
            if state == SurveyState::Running {
                self.0.stop();
            }
        }
    }

    let mut engine = engine.with_observer(StopOnStart(handle));
    let outcome = engine.run(StartMode::Fresh).expect("run");
    assert_eq!(outcome.state, SurveyState::Idle);
    // The first dispatch round runs before the stop is read.
    assert!(outcome.progress.completed <= 20);
    let checkpoint = engine.checkpoint_store().checkpoint().expect("saved on stop");
    assert!(checkpoint.is_consistent());
}

#[test]
fn unreadable_complexity_table_is_fatal_at_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = small_config(RuleSpace::new(0, 10));
    config.complexity_table = Some(dir.path().join("missing-ctm.json"));
    let mut engine = SurveyEngine::new(config, MemoryCheckpointStore::new()).expect("engine");
    let err = engine.run(StartMode::Fresh).expect_err("startup must fail");
    assert!(matches!(err, SurveyError::WorkerStartup { .. }));
    assert_eq!(engine.state(), SurveyState::Idle);
    assert!(engine.checkpoint_store().checkpoint().is_none());
}

#[test]
fn invalid_configuration_is_rejected_up_front() {
    let mut config = small_config(RuleSpace::new(0, 10));
    config.batch_size = 0;
    assert!(matches!(
        SurveyEngine::new(config, MemoryCheckpointStore::new()),
        Err(SurveyError::InvalidConfig(_))
    ));
}

/// Checkpoint store whose disk is always full.
#[derive(Default)]
struct FullDiskStore {
    attempts: usize,
}

impl CheckpointStore for FullDiskStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(None)
    }

    fn save(&mut self, _checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.attempts += 1;
        Err(CheckpointError::Io(std::io::Error::other("no space left on device")))
    }

    fn clear(&mut self) -> Result<(), CheckpointError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Collected {
    progress_events: Arc<Mutex<usize>>,
    results: Arc<Mutex<Vec<u32>>>,
}

impl SurveyObserver for Collected {
    fn on_progress(&mut self, _progress: &SurveyProgress) {
        *self.progress_events.lock().expect("lock") += 1;
    }

    fn on_complete(&mut self, results: &[MeasurementRecord], _elapsed: Duration) {
        let mut ids: Vec<u32> = results.iter().map(|r| r.rule_id).collect();
        ids.sort_unstable();
        *self.results.lock().expect("lock") = ids;
    }
}

#[test]
fn failing_checkpoint_saves_do_not_stop_the_survey() {
    let mut config = small_config(RuleSpace::new(900, 960));
    config.checkpoint_interval = 1;
    let observer = Collected::default();
    let sink = SharedSink::default();
    let mut engine = SurveyEngine::new(config, FullDiskStore::default())
        .expect("engine")
        .with_observer(observer.clone())
        .with_sink(sink.clone());

    let outcome = engine.run(StartMode::Fresh).expect("run");
    assert_eq!(outcome.state, SurveyState::Completed);
    assert_eq!(outcome.progress.completed, 60);
    assert_eq!(engine.state(), SurveyState::Completed);

    let expected: Vec<u32> = (900..960).collect();
    assert_eq!(*observer.results.lock().expect("lock"), expected);
    assert!(*observer.progress_events.lock().expect("lock") >= 6);
    let mut sunk = sink.ids.lock().expect("lock").clone();
    sunk.sort_unstable();
    assert_eq!(sunk, expected);
    assert_eq!(*sink.flushes.lock().expect("lock"), 1);

    // One attempt per completed batch plus the final save.
    assert!(engine.checkpoint_store().attempts >= 7);
}
