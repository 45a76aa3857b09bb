//! Error definitions for StrandKV.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StrandError>;

/// Unified error type for StrandKV operations.
#[derive(Error, Debug)]
pub enum StrandError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("WAL error: {0}")]
    Wal(String),

    #[error("Corruption in {location}: {details}")]
    Corruption { location: String, details: String },

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StrandError {
    /// Short machine-readable kind name, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StrandError::Io(_) => "io_error",
            StrandError::Storage(_) => "storage_error",
            StrandError::Wal(_) => "wal_error",
            StrandError::Corruption { .. } => "corruption",
            StrandError::ChecksumMismatch { .. } => "checksum_mismatch",
            StrandError::Transaction(_) => "transaction_error",
            StrandError::Network(_) => "network_error",
            StrandError::Protocol(_) => "protocol_error",
            StrandError::Config(_) => "config_error",
            StrandError::InvalidInput(_) => "invalid_input",
        }
    }
}
