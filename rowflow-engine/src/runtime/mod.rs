// Runtime Module
// Row sets, worker contract, status surface and the execution coordinator

pub mod control;
pub mod coordinator;
pub mod events;
pub mod result;
pub mod rowset;
pub mod status;
pub mod worker;

// Re-export key types
pub use control::ExecutionControl;
pub use coordinator::{ExecutionHandle, ExecutionState, PipelineExecution};
pub use events::{
    progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender,
};
pub use result::PipelineResult;
pub use rowset::{row_set, GetOutcome, PutOutcome, RowReceiver, RowSender, RowSetMeta};
pub use status::{StatusBoard, StepStatusView, WorkerSnapshot, WorkerStatus};
pub use worker::{InitContext, StepIo, StepWorker};
