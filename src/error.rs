//! Error types for Move More core

use thiserror::Error;

/// Structural failures. Sub-threshold detector results and nudge suppression
/// are normal outcomes and never show up here.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid motion window: {0}")]
    InvalidWindow(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid time of day: {0}")]
    InvalidTimeOfDay(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
