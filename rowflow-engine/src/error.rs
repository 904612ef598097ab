// Engine Errors
// Step-level and engine-level error types

use crate::document::PersistError;
use crate::graph::{GraphError, ValidationError};
use crate::row::SchemaError;
use crate::runtime::ExecutionState;
use crate::vfs::VfsError;

use std::fmt;
use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by step plugins and workers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    #[error("configuration error: {0}")]
    Config(String),

    /// A single row failed the step's transform
    #[error("{message}")]
    Row {
        message: String,
        field: Option<String>,
        code: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(String),

    /// A step this worker depends on did not finish cleanly
    #[error("{0}")]
    Dependency(String),

    /// `process_batch` panicked; the payload message is kept
    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("step was stopped")]
    Stopped,

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl StepError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// A row error without field or code annotation
    pub fn row(message: impl Into<String>) -> Self {
        Self::Row {
            message: message.into(),
            field: None,
            code: None,
        }
    }

    /// Attach the offending field name to a row error
    pub fn with_field(self, name: impl Into<String>) -> Self {
        match self {
            Self::Row { message, code, .. } => Self::Row {
                message,
                field: Some(name.into()),
                code,
            },
            other => other,
        }
    }

    /// Attach an error code to a row error
    pub fn with_code(self, value: impl Into<String>) -> Self {
        match self {
            Self::Row { message, field, .. } => Self::Row {
                message,
                field,
                code: Some(value.into()),
            },
            other => other,
        }
    }

    pub fn is_row_error(&self) -> bool {
        matches!(self, Self::Row { .. })
    }
}

impl From<VfsError> for StepError {
    fn from(err: VfsError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<std::io::Error> for StepError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A worker whose initialization failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFailure {
    pub step: String,
    pub copy: usize,
    pub message: String,
}

impl fmt::Display for InitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.step, self.copy, self.message)
    }
}

fn join_failures(failures: &[InitFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by the execution engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("initialization failed: {}", join_failures(.0))]
    Init(Vec<InitFailure>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cannot {action} while the pipeline is {state}")]
    InvalidState {
        action: &'static str,
        state: ExecutionState,
    },

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
