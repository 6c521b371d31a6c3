//! Grid-specific error types

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in grid trading operations
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("Invalid grid configuration: {0}")]
    InvalidConfig(String),

    #[error("Close already in progress for order {0}")]
    CloseInProgress(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{operation} failed after {attempts} attempts: {reason}")]
    CallFailed {
        operation: String,
        attempts: u32,
        reason: String,
    },

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl GridError {
    /// True for failures of an exchange call (never fatal to the bot)
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            GridError::Exchange(_)
                | GridError::Connectivity(_)
                | GridError::OrderRejected(_)
                | GridError::Timeout { .. }
                | GridError::CallFailed { .. }
        )
    }
}

impl From<config::ConfigError> for GridError {
    fn from(err: config::ConfigError) -> Self {
        GridError::Settings(err.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for GridError {
    fn from(err: std::io::Error) -> Self {
        GridError::Io(err.to_string())
    }
}

/// Result type for grid operations
pub type GridResult<T> = std::result::Result<T, GridError>;
