// Pipeline Result
// Aggregate outcome of one execution

use super::coordinator::ExecutionState;
use super::status::WorkerSnapshot;
use crate::row::same_name;

use std::time::Duration;

/// Result of a pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub pipeline_name: String,
    /// Terminal state: Finished, Stopped or Failed
    pub status: ExecutionState,
    /// Final counters of every worker copy
    pub workers: Vec<WorkerSnapshot>,
    pub total_errors: u64,
    /// The first fatal error messages, in the order they occurred
    pub error_messages: Vec<String>,
    pub duration: Duration,
    /// Input steps were asked to stop early and the rest drained
    pub safe_stopped: bool,
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionState::Finished
    }

    pub fn worker(&self, step: &str, copy: usize) -> Option<&WorkerSnapshot> {
        self.workers
            .iter()
            .find(|w| w.copy == copy && same_name(&w.step, step))
    }

    /// Counters of every copy of one step
    pub fn step_workers(&self, step: &str) -> Vec<&WorkerSnapshot> {
        self.workers
            .iter()
            .filter(|w| same_name(&w.step, step))
            .collect()
    }
}
