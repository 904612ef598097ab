// Worker Status Surface
// Lock-free per-worker status and counters, readable from any task

use crate::row::same_name;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle status of one worker copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerStatus {
    Initializing = 0,
    Running = 1,
    Paused = 2,
    Finished = 3,
    Stopped = 4,
    Failed = 5,
}

impl WorkerStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Initializing,
            1 => WorkerStatus::Running,
            2 => WorkerStatus::Paused,
            3 => WorkerStatus::Finished,
            4 => WorkerStatus::Stopped,
            _ => WorkerStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Finished | WorkerStatus::Stopped | WorkerStatus::Failed
        )
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerStatus::Initializing => "INITIALIZING",
            WorkerStatus::Running => "RUNNING",
            WorkerStatus::Paused => "PAUSED",
            WorkerStatus::Finished => "FINISHED",
            WorkerStatus::Stopped => "STOPPED",
            WorkerStatus::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
struct StatusCell {
    origin: Instant,
    status: AtomicU8,
    lines_read: AtomicU64,
    lines_written: AtomicU64,
    lines_input: AtomicU64,
    lines_output: AtomicU64,
    lines_updated: AtomicU64,
    lines_rejected: AtomicU64,
    errors: AtomicU64,
    idle: AtomicBool,
    // nanoseconds since `origin` plus one, zero while unset
    started_ns: AtomicU64,
    finished_ns: AtomicU64,
}

impl StatusCell {
    fn new(origin: Instant) -> Self {
        Self {
            origin,
            status: AtomicU8::new(WorkerStatus::Initializing as u8),
            lines_read: AtomicU64::new(0),
            lines_written: AtomicU64::new(0),
            lines_input: AtomicU64::new(0),
            lines_output: AtomicU64::new(0),
            lines_updated: AtomicU64::new(0),
            lines_rejected: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            idle: AtomicBool::new(false),
            started_ns: AtomicU64::new(0),
            finished_ns: AtomicU64::new(0),
        }
    }

    fn stamp(&self, slot: &AtomicU64) {
        let elapsed = self.origin.elapsed().as_nanos().min(u64::MAX as u128 - 1) as u64;
        slot.store(elapsed + 1, Ordering::Release);
    }

    fn instant(&self, slot: &AtomicU64) -> Option<Instant> {
        match slot.load(Ordering::Acquire) {
            0 => None,
            ns => Some(self.origin + Duration::from_nanos(ns - 1)),
        }
    }
}

/// Write access to one worker's status, held only by that worker
#[derive(Debug, Clone)]
pub struct StatusWriter {
    cell: Arc<StatusCell>,
}

impl StatusWriter {
    pub fn set_status(&self, status: WorkerStatus) {
        self.cell.status.store(status as u8, Ordering::Release);
    }

    pub fn mark_started(&self) {
        self.cell.stamp(&self.cell.started_ns);
        self.set_status(WorkerStatus::Running);
    }

    /// Record the finish time, then publish the terminal status
    pub fn finish(&self, status: WorkerStatus) {
        self.cell.idle.store(false, Ordering::Relaxed);
        self.cell.stamp(&self.cell.finished_ns);
        self.set_status(status);
    }

    pub fn set_idle(&self, idle: bool) {
        self.cell.idle.store(idle, Ordering::Relaxed);
    }

    /// Increment rows read, returning the new total
    pub fn inc_read(&self) -> u64 {
        self.cell.lines_read.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_written(&self) {
        self.cell.lines_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_input(&self) {
        self.cell.lines_input.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_output(&self) {
        self.cell.lines_output.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_updated(&self) {
        self.cell.lines_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.cell.lines_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.cell.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of one worker's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub step: String,
    pub copy: usize,
    pub status: WorkerStatus,
    pub lines_read: u64,
    pub lines_written: u64,
    pub lines_input: u64,
    pub lines_output: u64,
    pub lines_updated: u64,
    pub lines_rejected: u64,
    pub errors: u64,
    pub duration: Option<Duration>,
}

/// Read-only view of one worker's status
#[derive(Debug, Clone)]
pub struct StepStatusView {
    step: String,
    copy: usize,
    cell: Arc<StatusCell>,
}

impl StepStatusView {
    pub fn step(&self) -> &str {
        &self.step
    }

    pub fn copy(&self) -> usize {
        self.copy
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.cell.status.load(Ordering::Acquire))
    }

    pub fn lines_read(&self) -> u64 {
        self.cell.lines_read.load(Ordering::Relaxed)
    }

    pub fn lines_written(&self) -> u64 {
        self.cell.lines_written.load(Ordering::Relaxed)
    }

    pub fn lines_input(&self) -> u64 {
        self.cell.lines_input.load(Ordering::Relaxed)
    }

    pub fn lines_output(&self) -> u64 {
        self.cell.lines_output.load(Ordering::Relaxed)
    }

    pub fn lines_updated(&self) -> u64 {
        self.cell.lines_updated.load(Ordering::Relaxed)
    }

    pub fn lines_rejected(&self) -> u64 {
        self.cell.lines_rejected.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.cell.errors.load(Ordering::Relaxed)
    }

    /// Whether the worker is waiting on empty inputs
    pub fn is_idle(&self) -> bool {
        self.cell.idle.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.cell.instant(&self.cell.started_ns)
    }

    /// When the worker reached its terminal status
    pub fn finished_at(&self) -> Option<Instant> {
        self.cell.instant(&self.cell.finished_ns)
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let duration = match (self.started_at(), self.finished_at()) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            (Some(start), None) => Some(start.elapsed()),
            _ => None,
        };
        WorkerSnapshot {
            step: self.step.clone(),
            copy: self.copy,
            status: self.status(),
            lines_read: self.lines_read(),
            lines_written: self.lines_written(),
            lines_input: self.lines_input(),
            lines_output: self.lines_output(),
            lines_updated: self.lines_updated(),
            lines_rejected: self.lines_rejected(),
            errors: self.errors(),
            duration,
        }
    }
}

/// Status of every worker in one execution
#[derive(Debug)]
pub struct StatusBoard {
    origin: Instant,
    views: Vec<StepStatusView>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            views: Vec::new(),
        }
    }

    /// Add a worker and hand out its writer
    pub(crate) fn register(&mut self, step: &str, copy: usize) -> StatusWriter {
        let cell = Arc::new(StatusCell::new(self.origin));
        self.views.push(StepStatusView {
            step: step.to_string(),
            copy,
            cell: Arc::clone(&cell),
        });
        StatusWriter { cell }
    }

    pub fn views(&self) -> &[StepStatusView] {
        &self.views
    }

    pub fn find(&self, step: &str, copy: usize) -> Option<&StepStatusView> {
        self.views
            .iter()
            .find(|v| v.copy == copy && same_name(&v.step, step))
    }

    pub fn copies_of(&self, step: &str) -> Vec<&StepStatusView> {
        self.views.iter().filter(|v| same_name(&v.step, step)).collect()
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.views.iter().map(|v| v.snapshot()).collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.views.iter().all(|v| v.status().is_terminal())
    }

    pub fn total_errors(&self) -> u64 {
        self.views.iter().map(|v| v.errors()).sum()
    }
}
