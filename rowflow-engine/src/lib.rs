// Rowflow Engine Library
// Row model, pipeline graph, schema propagation and the dataflow runtime

pub mod config;
pub mod document;
pub mod error;
pub mod graph;
pub mod row;
pub mod runtime;
pub mod steps;
pub mod vfs;

// Re-export commonly used types
pub use config::ExecutionConfig;
pub use error::{EngineError, EngineResult, InitFailure, StepError};

// Re-export row model types
pub use row::{FieldDescriptor, FieldFormat, Row, RowSchema, SchemaError, Value, ValueType};

// Re-export graph types
pub use graph::{
    CheckContext, CheckRemark, ErrorHandling, FieldsContext, GraphError, GraphErrorKind,
    GraphValidator, Hop, HopKind, PartitionMethod, Partitioning, PipelineGraph, RemarkSeverity,
    SharedGraph, StepMeta, ValidationError,
};

// Re-export runtime types
pub use runtime::{
    progress_channel, ExecutionControl, ExecutionEvent, ExecutionHandle, ExecutionState,
    InitContext, LogLevel, PipelineExecution, PipelineResult, ProgressReceiver, ProgressSender,
    StatusBoard, StepIo, StepStatusView, StepWorker, WorkerSnapshot, WorkerStatus,
};

// Re-export step and persistence types
pub use document::{PersistError, PipelineDocument, PipelineParser, StepDocument};
pub use steps::{StepPlugin, StepRegistry};
pub use vfs::{LocalVfs, Vfs, VfsError};
