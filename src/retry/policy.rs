use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::UNREACHABLE_DETAIL;

/// Distinguishes failures worth waiting out from failures that need the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transient; the controller may count down and try again.
    Retryable,
    /// Retrying cannot help (e.g. the service is unreachable).
    Terminal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Retryable => write!(f, "Retryable"),
            FailureKind::Terminal => write!(f, "Terminal"),
        }
    }
}

/// Configuration for countdown retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Automatic retries after the first attempt.
    pub max_retries: u32,
    /// Length of each countdown in seconds; it ticks once per second.
    pub countdown_secs: u32,
    /// Failure texts containing any of these are never retried.
    pub terminal_markers: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            countdown_secs: 10,
            terminal_markers: vec![UNREACHABLE_DETAIL.to_string()],
        }
    }
}

impl RetryPolicy {
    pub const TICK: Duration = Duration::from_secs(1);

    pub fn classify(&self, detail: &str) -> FailureKind {
        if self
            .terminal_markers
            .iter()
            .any(|marker| detail.contains(marker.as_str()))
        {
            FailureKind::Terminal
        } else {
            FailureKind::Retryable
        }
    }

    /// Whether a failure at `attempt` (0 = first try) may be retried.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}
