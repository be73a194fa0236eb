use lifelike_core::RULE_COUNT;
use lifelike_measure::{MeasureConfig, MeasureError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Rules handed to a worker per dispatch.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Newly completed rules between checkpoint saves.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 1000;
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 30;
const FALLBACK_WORKERS: usize = 4;

/// Errors raised while starting or running a survey.
#[derive(Debug, Error)]
pub enum SurveyError {
    /// Indicates an invalid configuration value.
    #[error("invalid survey configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Measure(#[from] MeasureError),
    #[error("failed to spawn survey worker {worker}: {reason}")]
    WorkerSpawn { worker: usize, reason: String },
    #[error("survey worker {worker} failed to start: {reason}")]
    WorkerStartup { worker: usize, reason: String },
    #[error("only {ready} of {expected} survey workers reported ready before the startup timeout")]
    StartupTimeout { ready: usize, expected: usize },
    #[error("survey worker {worker} is no longer accepting batches")]
    WorkerLost { worker: usize },
}

/// Half-open range of rule ids a survey covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpace {
    pub start: u32,
    pub end: u32,
}

impl Default for RuleSpace {
    fn default() -> Self {
        Self::FULL
    }
}

impl RuleSpace {
    /// Every Life-like rule.
    pub const FULL: RuleSpace = RuleSpace {
        start: 0,
        end: RULE_COUNT,
    };

    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start) as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[must_use]
    pub const fn contains(&self, rule_id: u32) -> bool {
        rule_id >= self.start && rule_id < self.end
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> {
        self.start..self.end
    }
}

/// Configuration for a survey run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    pub batch_size: usize,
    pub checkpoint_interval: usize,
    pub rule_space: RuleSpace,
    /// Per-rule measurement settings shared by every worker.
    pub measure: MeasureConfig,
    /// Optional JSON complexity table each worker loads at startup.
    pub complexity_table: Option<PathBuf>,
    /// How long to wait for every worker to report ready.
    pub startup_timeout_secs: u64,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            worker_count: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(FALLBACK_WORKERS),
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            rule_space: RuleSpace::FULL,
            measure: MeasureConfig::default(),
            complexity_table: None,
            startup_timeout_secs: DEFAULT_STARTUP_TIMEOUT_SECS,
        }
    }
}

impl SurveyConfig {
    pub fn validate(&self) -> Result<(), SurveyError> {
        if self.worker_count == 0 {
            return Err(SurveyError::InvalidConfig("worker_count must be non-zero"));
        }
        if self.batch_size == 0 {
            return Err(SurveyError::InvalidConfig("batch_size must be non-zero"));
        }
        if self.checkpoint_interval == 0 {
            return Err(SurveyError::InvalidConfig(
                "checkpoint_interval must be non-zero",
            ));
        }
        if self.rule_space.is_empty() {
            return Err(SurveyError::InvalidConfig("rule_space must not be empty"));
        }
        if self.rule_space.end > RULE_COUNT {
            return Err(SurveyError::InvalidConfig(
                "rule_space must lie within the 262144 Life-like rules",
            ));
        }
        if self.startup_timeout_secs == 0 {
            return Err(SurveyError::InvalidConfig(
                "startup_timeout_secs must be non-zero",
            ));
        }
        self.measure.validate()?;
        Ok(())
    }

    #[must_use]
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Number of rules the survey covers.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.rule_space.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_full_rule_space() {
        let config = SurveyConfig::default();
        config.validate().expect("defaults are valid");
        assert_eq!(config.total(), 262_144);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.checkpoint_interval, 1000);
        assert!(config.worker_count > 0);
    }

    #[test]
    fn rejects_degenerate_settings() {
        let cases: [fn(&mut SurveyConfig); 6] = [
            |c| c.worker_count = 0,
            |c| c.batch_size = 0,
            |c| c.checkpoint_interval = 0,
            |c| c.rule_space = RuleSpace::new(10, 10),
            |c| c.rule_space = RuleSpace::new(0, RULE_COUNT + 1),
            |c| c.startup_timeout_secs = 0,
        ];
        for mutate in cases {
            let mut config = SurveyConfig::default();
            mutate(&mut config);
            assert!(matches!(
                config.validate(),
                Err(SurveyError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn nested_measure_config_is_checked() {
        let mut config = SurveyConfig::default();
        config.measure.density = -0.1;
        assert!(matches!(config.validate(), Err(SurveyError::Measure(_))));
    }

    #[test]
    fn rule_space_bounds() {
        let space = RuleSpace::new(5, 8);
        assert_eq!(space.len(), 3);
        assert!(space.contains(5) && space.contains(7) && !space.contains(8));
        assert_eq!(space.ids().collect::<Vec<_>>(), vec![5, 6, 7]);
        assert_eq!(RuleSpace::new(9, 3).len(), 0);
    }
}
