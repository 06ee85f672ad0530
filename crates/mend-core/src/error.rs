//! Unified error types for Mend

use thiserror::Error;

/// Unified error type for all Mend operations
///
/// Device and transport failures are not represented here: they are captured
/// as [`crate::ErrorInfo`] inside step results and never abort a plan run.
/// Routing misses and busy workers travel the same way, as
/// [`crate::ErrorKind::NoWorkerAvailable`] and [`crate::ErrorKind::WorkerBusy`].
#[derive(Error, Debug)]
pub enum MendError {
    // Planner errors
    #[error("Invalid device analysis: {0}")]
    InvalidAnalysis(String),

    // Recovery errors
    #[error("Recovery system failure: {0}")]
    RecoverySystemFailure(String),

    // Orchestrator errors
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using MendError
pub type Result<T> = std::result::Result<T, MendError>;
