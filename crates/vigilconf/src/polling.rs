//! Polling budgets for each job kind.
//!
//! A budget is `interval x max_attempts`: the wall-clock bound a caller is
//! willing to wait before declaring a timeout.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often and how many times to probe one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollBudget {
    /// Seconds between probes.
    pub interval_secs: u64,

    /// Probes allowed before giving up locally.
    pub max_attempts: u32,
}

impl PollBudget {
    pub fn new(interval_secs: u64, max_attempts: u32) -> Self {
        Self {
            interval_secs,
            max_attempts,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Worst-case wall time spent waiting.
    pub fn total(&self) -> Duration {
        self.interval() * self.max_attempts
    }
}

/// Per-kind polling budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Video renders: every 10s, up to 60 times (~10 minutes).
    #[serde(default = "PollingConfig::default_video")]
    pub video: PollBudget,

    /// Research agent runs: every 30s, up to 180 times (~90 minutes).
    #[serde(default = "PollingConfig::default_research")]
    pub research: PollBudget,
}

impl PollingConfig {
    fn default_video() -> PollBudget {
        PollBudget::new(10, 60)
    }

    fn default_research() -> PollBudget {
        PollBudget::new(30, 180)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            video: Self::default_video(),
            research: Self::default_research(),
        }
    }
}
