//! Survey session state and checkpoint persistence.

use crate::config::RuleSpace;
use lifelike_core::MeasurementRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("checkpoint payload is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted survey progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub results: Vec<MeasurementRecord>,
    #[serde(rename = "completedRuleIds")]
    pub completed_rule_ids: Vec<u32>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Checkpoint {
    /// Whether `completed_rule_ids` names exactly the rules present in `results`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let from_results: HashSet<u32> = self.results.iter().map(|r| r.rule_id).collect();
        let completed: HashSet<u32> = self.completed_rule_ids.iter().copied().collect();
        from_results.len() == self.results.len()
            && completed.len() == self.completed_rule_ids.len()
            && from_results == completed
    }
}

/// Milliseconds since the Unix epoch, zero if the clock is before it.
#[must_use]
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Where survey checkpoints live. Only the coordinator calls these.
pub trait CheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    fn clear(&mut self) -> Result<(), CheckpointError>;
}

/// Checkpoint held in memory; useful for tests and one-shot runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    checkpoint: Option<Checkpoint>,
    saves: usize,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoint.clone())
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.checkpoint = Some(checkpoint.clone());
        self.saves += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CheckpointError> {
        self.checkpoint = None;
        Ok(())
    }
}

/// Checkpoint stored as a JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let staging = self.staging_path();
        fs::write(&staging, serde_json::to_vec(checkpoint)?)?;
        fs::rename(&staging, &self.path)?;
        debug!(path = %self.path.display(), rules = checkpoint.completed_rule_ids.len(), "checkpoint written");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Accumulated results and completed ids, owned by the coordinator.
///
/// Every record has exactly one id in the completed set and vice versa;
/// a second record for an already completed rule is ignored.
#[derive(Debug, Clone, Default)]
pub struct SurveySession {
    results: Vec<MeasurementRecord>,
    completed: HashSet<u32>,
}

impl SurveySession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a session from a checkpoint.
    ///
    /// Ids listed without a record are dropped (they will be measured
    /// again) and duplicate records keep the first occurrence.
    #[must_use]
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        let consistent = checkpoint.is_consistent();
        let listed = checkpoint.completed_rule_ids.len();
        let mut session = Self::new();
        for record in checkpoint.results {
            session.record(record);
        }
        if !consistent {
            warn!(
                listed,
                recovered = session.completed_count(),
                "checkpoint completed ids disagreed with its records; rebuilt from records"
            );
        }
        session
    }

    /// Load from `store`, falling back to an empty session on any failure.
    pub fn restore<S: CheckpointStore + ?Sized>(store: &S) -> Self {
        match store.load() {
            Ok(Some(checkpoint)) => {
                let session = Self::from_checkpoint(checkpoint);
                info!(completed = session.completed_count(), "loaded survey checkpoint");
                session
            }
            Ok(None) => Self::new(),
            Err(err) => {
                warn!(error = %err, "failed to load survey checkpoint; starting from empty progress");
                Self::new()
            }
        }
    }

    /// Add a record. Returns `false` when its rule was already completed.
    pub fn record(&mut self, record: MeasurementRecord) -> bool {
        if !self.completed.insert(record.rule_id) {
            return false;
        }
        self.results.push(record);
        true
    }

    #[must_use]
    pub fn is_completed(&self, rule_id: u32) -> bool {
        self.completed.contains(&rule_id)
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Completed rules that fall inside `space`.
    #[must_use]
    pub fn completed_in(&self, space: RuleSpace) -> usize {
        self.completed.iter().filter(|&&id| space.contains(id)).count()
    }

    /// Rules in `space` not yet completed, in ascending order.
    #[must_use]
    pub fn remaining(&self, space: RuleSpace) -> VecDeque<u32> {
        space.ids().filter(|id| !self.completed.contains(id)).collect()
    }

    /// Records in arrival order.
    #[must_use]
    pub fn results(&self) -> &[MeasurementRecord] {
        &self.results
    }

    #[must_use]
    pub fn into_results(self) -> Vec<MeasurementRecord> {
        self.results
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.completed.clear();
    }

    /// Snapshot for persistence. Completed ids are sorted.
    #[must_use]
    pub fn to_checkpoint(&self) -> Checkpoint {
        let mut completed_rule_ids: Vec<u32> = self.completed.iter().copied().collect();
        completed_rule_ids.sort_unstable();
        Checkpoint {
            results: self.results.clone(),
            completed_rule_ids,
            timestamp: epoch_millis(),
        }
    }

    /// Save to `store`; failures are logged and otherwise ignored.
    pub fn save_to<S: CheckpointStore + ?Sized>(&self, store: &mut S) -> bool {
        match store.save(&self.to_checkpoint()) {
            Ok(()) => {
                debug!(completed = self.completed_count(), "saved survey checkpoint");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to save survey checkpoint; continuing");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifelike_core::Rule;

    fn record(id: u32) -> MeasurementRecord {
        MeasurementRecord::empty(Rule::from_id(id).expect("rule"))
    }

    #[test]
    fn session_ignores_duplicates_and_tracks_remaining() {
        let mut session = SurveySession::new();
        assert!(session.record(record(3)));
        assert!(session.record(record(1)));
        assert!(!session.record(record(3)));
        assert_eq!(session.completed_count(), 2);
        assert_eq!(session.results().len(), 2);

        let space = RuleSpace::new(0, 6);
        assert_eq!(session.completed_in(space), 2);
        assert_eq!(session.completed_in(RuleSpace::new(2, 6)), 1);
        assert_eq!(Vec::from(session.remaining(space)), vec![0, 2, 4, 5]);
    }

    #[test]
    fn checkpoint_round_trips_consistently() {
        let mut session = SurveySession::new();
        for id in [9, 4, 7] {
            session.record(record(id));
        }
        let checkpoint = session.to_checkpoint();
        assert!(checkpoint.is_consistent());
        assert_eq!(checkpoint.completed_rule_ids, vec![4, 7, 9]);
        assert!(checkpoint.timestamp > 0);

        let json = serde_json::to_value(&checkpoint).expect("serialize");
        assert!(json.get("completedRuleIds").is_some());

        let restored = SurveySession::from_checkpoint(checkpoint);
        assert_eq!(restored.completed_count(), 3);
        assert!(restored.is_completed(7));
    }

    #[test]
    fn orphaned_ids_are_dropped_on_restore() {
        let checkpoint = Checkpoint {
            results: vec![record(1), record(2), record(2)],
            completed_rule_ids: vec![1, 2, 3],
            timestamp: 1,
        };
        assert!(!checkpoint.is_consistent());
        let session = SurveySession::from_checkpoint(checkpoint);
        assert_eq!(session.completed_count(), 2);
        assert!(!session.is_completed(3));
        assert_eq!(session.results().len(), 2);
        assert!(session.to_checkpoint().is_consistent());
    }

    #[test]
    fn file_store_saves_loads_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonFileCheckpointStore::new(dir.path().join("nested").join("survey.json"));
        assert!(store.load().expect("load").is_none());

        let mut session = SurveySession::new();
        session.record(record(11));
        assert!(session.save_to(&mut store));
        assert!(store.path().exists());
        assert!(!store.staging_path().exists());

        let loaded = store.load().expect("load").expect("present");
        assert_eq!(loaded.completed_rule_ids, vec![11]);

        store.clear().expect("clear");
        store.clear().expect("clearing twice is fine");
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn corrupt_file_restores_empty_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("survey.json");
        fs::write(&path, b"{not json").expect("write");
        let store = JsonFileCheckpointStore::new(&path);
        assert!(matches!(store.load(), Err(CheckpointError::Json(_))));
        assert_eq!(SurveySession::restore(&store).completed_count(), 0);
    }

    #[test]
    fn memory_store_counts_saves() {
        let mut store = MemoryCheckpointStore::new();
        let session = SurveySession::new();
        session.save_to(&mut store);
        session.save_to(&mut store);
        assert_eq!(store.saves(), 2);
        assert!(store.checkpoint().is_some());
        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
    }
}
