// Execution Configuration
// Tunables shared by the coordinator, row sets and workers

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a pipeline execution
///
/// Read from the `settings:` block of a pipeline document. Every field has a
/// default so partial blocks are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Capacity of every row set
    pub row_set_size: usize,
    /// Bounded wait on a full or empty row set before re-checking stop and pause
    pub wait_timeout_ms: u64,
    /// Stop every worker as soon as one of them fails
    pub stop_on_failure: bool,
    /// Number of fatal error messages kept on the pipeline result
    pub max_error_messages: usize,
    /// Poll interval of steps waiting on other steps to finish
    pub sync_poll_interval_ms: u64,
    /// Emit a progress log every N rows read per worker (0 disables)
    pub feedback_size: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            row_set_size: 10_000,
            wait_timeout_ms: 50,
            stop_on_failure: false,
            max_error_messages: 10,
            sync_poll_interval_ms: 200,
            feedback_size: 50_000,
        }
    }
}

impl ExecutionConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms.max(1))
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms.max(1))
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}
