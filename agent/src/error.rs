//! Agent-specific error types

use shaper::ShaperError;
use shared::{SharedError, Target};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid value for {field}: {value} ({reason})")]
    Validation {
        field: String,
        value: String,
        reason: String,
    },

    #[error("State store {operation} failed on {path}: {source}")]
    StateStore {
        operation: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No tracked {target} experiment with id {id}")]
    RecordNotFound { target: Target, id: String },

    #[error("No active {target} experiment ({detail})")]
    NoActiveExperiment { target: Target, detail: String },

    #[error("Failed to terminate process {pid}: {reason}")]
    TerminateFailed { pid: u32, reason: String },

    #[error("Failed to start detached worker: {reason}")]
    Spawn { reason: String },

    #[error("Traffic shaper error: {0}")]
    Shaper(#[from] ShaperError),

    #[error("Shared component error: {0}")]
    Shared(#[from] SharedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Experiment workload failed: {reason}")]
    Runner { reason: String },
}

/// Coarse classification used for exit reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input, nothing was touched
    Validation,
    /// Host, filesystem or missing capability
    Environment,
    /// The process exists but may not be signalled by us
    Ownership,
    /// Nothing to act on any more
    AlreadyGone,
    /// The workload itself failed while running
    Runtime,
}

impl AgentError {
    pub fn validation(field: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn store(operation: &str, path: &std::path::Path, source: std::io::Error) -> Self {
        Self::StateStore {
            operation: operation.to_string(),
            path: path.display().to_string(),
            source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AgentError::Validation { .. } => ErrorCategory::Validation,
            AgentError::StateStore { .. } | AgentError::Spawn { .. } | AgentError::Io(_) => ErrorCategory::Environment,
            AgentError::RecordNotFound { .. } | AgentError::NoActiveExperiment { .. } => ErrorCategory::AlreadyGone,
            AgentError::TerminateFailed { .. } => ErrorCategory::Ownership,
            AgentError::Runner { .. } => ErrorCategory::Runtime,
            AgentError::Shaper(e) => match e {
                ShaperError::InvalidConfig { .. } => ErrorCategory::Validation,
                ShaperError::CaptureUnavailable { .. } | ShaperError::Open { .. } => ErrorCategory::Environment,
                ShaperError::Capture { .. } | ShaperError::Inject { .. } => ErrorCategory::Runtime,
            },
            AgentError::Shared(e) => match e {
                SharedError::InvalidTarget { .. } | SharedError::InvalidConfig { .. } => ErrorCategory::Validation,
                SharedError::SerializationError { .. } | SharedError::DeserializationError { .. } => {
                    ErrorCategory::Environment
                }
            },
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
