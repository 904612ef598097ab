// Execution Events
// Progress reporting and event types for pipeline execution

use super::coordinator::ExecutionState;
use super::status::WorkerSnapshot;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// All workers were launched
    PipelineStarted {
        pipeline_name: String,
        total_workers: usize,
    },

    /// Every worker reached a terminal status
    PipelineCompleted {
        pipeline_name: String,
        status: ExecutionState,
        duration: Duration,
    },

    /// A worker copy entered its processing loop
    WorkerStarted { step: String, copy: usize },

    /// A worker copy ended, with its final counters
    WorkerCompleted { snapshot: WorkerSnapshot },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        step: Option<String>,
        copy: Option<usize>,
    },

    /// Execution error occurred
    Error {
        message: String,
        step: Option<String>,
        copy: Option<usize>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a pipeline started event
    pub fn pipeline_started(name: impl Into<String>, total_workers: usize) -> Self {
        Self::PipelineStarted {
            pipeline_name: name.into(),
            total_workers,
        }
    }

    /// Create a pipeline completed event
    pub fn pipeline_completed(
        name: impl Into<String>,
        status: ExecutionState,
        duration: Duration,
    ) -> Self {
        Self::PipelineCompleted {
            pipeline_name: name.into(),
            status,
            duration,
        }
    }

    pub fn worker_started(step: impl Into<String>, copy: usize) -> Self {
        Self::WorkerStarted {
            step: step.into(),
            copy,
        }
    }

    pub fn worker_completed(snapshot: WorkerSnapshot) -> Self {
        Self::WorkerCompleted { snapshot }
    }

    /// Create an info log event for a worker
    pub fn info(message: impl Into<String>, step: Option<String>, copy: Option<usize>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            step,
            copy,
        }
    }

    /// Create a warning log event for a worker
    pub fn warning(message: impl Into<String>, step: Option<String>, copy: Option<usize>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            step,
            copy,
        }
    }

    /// Create an execution error event
    pub fn execution_error(
        message: impl Into<String>,
        step: Option<String>,
        copy: Option<usize>,
    ) -> Self {
        Self::Error {
            message: message.into(),
            step,
            copy,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
