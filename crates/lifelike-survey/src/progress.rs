use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

impl SurveyState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SurveyState::Idle => "idle",
            SurveyState::Running => "running",
            SurveyState::Paused => "paused",
            SurveyState::Completed => "completed",
        }
    }

    /// Running or paused.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, SurveyState::Running | SurveyState::Paused)
    }
}

impl fmt::Display for SurveyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time survey progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyProgress {
    /// Completed rules inside the configured rule space.
    pub completed: usize,
    pub total: usize,
    pub percent: f64,
    pub elapsed_secs: f64,
    /// Rules per second completed since this run started.
    pub rate: f64,
    /// Seconds until completion at the current rate; zero when unknown.
    pub eta_secs: f64,
    pub failed: usize,
    pub is_running: bool,
    pub is_paused: bool,
}

impl SurveyProgress {
    /// Derive rate and ETA from wall time since the run started.
    ///
    /// `completed_this_run` excludes rules restored from a checkpoint, so a
    /// resumed survey does not report an inflated rate.
    #[must_use]
    pub fn compute(
        completed: usize,
        completed_this_run: usize,
        total: usize,
        failed: usize,
        elapsed: Duration,
        state: SurveyState,
    ) -> Self {
        let elapsed_secs = elapsed.as_secs_f64();
        let rate = if elapsed_secs > 0.0 {
            completed_this_run as f64 / elapsed_secs
        } else {
            0.0
        };
        let remaining = total.saturating_sub(completed);
        let eta_secs = if rate > 0.0 {
            remaining as f64 / rate
        } else {
            0.0
        };
        let percent = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            completed,
            total,
            percent,
            elapsed_secs,
            rate,
            eta_secs,
            failed,
            is_running: state.is_active(),
            is_paused: state == SurveyState::Paused,
        }
    }
}

impl fmt::Display for SurveyProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.2}%) {:.1} rules/s, eta {:.0}s",
            self.completed, self.total, self.percent, self.rate, self.eta_secs
        )
    }
}
