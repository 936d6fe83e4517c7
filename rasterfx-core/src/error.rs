//! Error taxonomy for the filter engine.
//!
//! None of these are meant to stop a host's drawing loop: every failure is
//! logged where it is detected and the host surface keeps its pixels.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("GPU context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("No shader available for operation: {0}")]
    UnsupportedOperation(String),

    #[error("Cannot apply filter: shader not initialized")]
    ShaderUnresolved,

    #[error("Filter engine was not initialized")]
    UninitializedEngine,

    #[error("Shader compilation failed for {label}: {message}")]
    ShaderCompilation { label: String, message: String },

    #[error("Host surface has no pixels to filter")]
    EmptySurface,

    #[error("Readback failed: {0}")]
    Readback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FilterError {
    pub fn compilation<L: ToString, M: ToString>(label: L, message: M) -> Self {
        FilterError::ShaderCompilation {
            label: label.to_string(),
            message: message.to_string(),
        }
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        FilterError::Readback(msg.to_string())
    }

    /// Whether the engine can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            FilterError::ContextUnavailable(_) | FilterError::UninitializedEngine
        )
    }
}

impl From<serde_json::Error> for FilterError {
    fn from(err: serde_json::Error) -> Self {
        FilterError::Config(err.to_string())
    }
}

/// Result type alias for filter operations
pub type FilterResult<T> = Result<T, FilterError>;
