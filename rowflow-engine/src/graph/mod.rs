// Pipeline Graph Module
// Steps, hops, schema propagation and structural validation

pub mod fields;
pub mod hop;
pub mod pipeline;
pub mod shared;
pub mod step;
pub mod validator;

// Re-export key types
pub use fields::FieldsContext;
pub use hop::{Hop, HopKind};
pub use pipeline::PipelineGraph;
pub use shared::SharedGraph;
pub use step::{ErrorHandling, Partitioning, PartitionMethod, StepMeta};
pub use validator::{CheckContext, CheckRemark, GraphValidator, RemarkSeverity, ValidationError};

use std::fmt;

/// Error type for graph operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to a step that is not part of the graph
    UnknownStep,
    /// A step with the same name already exists
    DuplicateStep,
    /// Invalid pipeline structure
    InvalidStructure,
    /// Requested step does not exist
    NotFound,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::CyclicDependency,
        }
    }

    pub fn unknown_step(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownStep,
        }
    }

    pub fn duplicate_step(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::DuplicateStep,
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
        }
    }

    pub fn not_found(step: &str) -> Self {
        Self {
            message: format!("step '{}' not found", step),
            kind: GraphErrorKind::NotFound,
        }
    }
}
