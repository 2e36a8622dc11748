//! Shaper error types

use thiserror::Error;

/// Result type for shaper operations
pub type ShaperResult<T> = Result<T, ShaperError>;

/// Shaper error types
#[derive(Error, Debug)]
pub enum ShaperError {
    #[error("Invalid shaping parameter: {field} = {value} ({reason})")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Packet capture driver '{capability}' is not installed: {detail}")]
    CaptureUnavailable { capability: String, detail: String },

    #[error("Failed to open capture session for filter '{filter}': {reason}")]
    Open { filter: String, reason: String },

    #[error("Packet capture failed: {reason}")]
    Capture { reason: String },

    #[error("Packet re-injection failed: {reason}")]
    Inject { reason: String },
}

impl ShaperError {
    /// True when the failure means a setup step was skipped, not a bug
    pub fn is_capability_missing(&self) -> bool {
        matches!(self, ShaperError::CaptureUnavailable { .. })
    }
}
