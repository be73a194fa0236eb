//! Resumable, parallel survey of every Life-like rule.

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod export;
pub mod pool;
pub mod progress;

pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, JsonFileCheckpointStore, MemoryCheckpointStore,
    SurveySession, epoch_millis,
};
pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHECKPOINT_INTERVAL, RuleSpace, SurveyConfig, SurveyError,
};
pub use engine::{
    NullObserver, RuleFailure, StartMode, SurveyEngine, SurveyHandle, SurveyObserver,
    SurveyOutcome,
};
pub use export::{CSV_COLUMNS, FieldStats, SurveyStats, csv_row, to_csv_string, write_csv};
pub use pool::{Batch, WorkerEvent, WorkerPool};
pub use progress::{SurveyProgress, SurveyState};
