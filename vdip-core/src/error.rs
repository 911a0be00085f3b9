//! Error types for the VDIP-1 session engine.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to the VDIP-1.
#[derive(Error, Debug)]
pub enum VdipError {
    #[error("Timed out after {0:?} waiting for the device")]
    Timeout(Duration),

    #[error("Response line exceeds {0} bytes")]
    LineOverflow(usize),

    #[error("Unable to synchronize with the device after {0} attempts")]
    SyncFailed(u32),

    #[error("No flash drive found")]
    NoDisk,

    #[error("Directory not found: {name} ({response})")]
    DirNotFound { name: String, response: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("{command}: {response}")]
    CommandFailed { command: String, response: String },

    #[error("Unexpected response to {command}: {response:?}")]
    UnexpectedResponse { command: String, response: String },

    #[error("Write failed after {written} of {requested} bytes")]
    WriteFailed { written: usize, requested: usize },

    #[error("Expected {expected} hex fields, found {found}")]
    ShortField { expected: usize, found: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Broad classification of a [`VdipError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A byte-level wait ran out of budget.
    Timeout,
    /// The device answered, but not with what the command expects.
    Protocol,
    /// The host side failed (files, config, serial driver, bad arguments).
    Host,
}

impl VdipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VdipError::Timeout(_) | VdipError::WriteFailed { .. } => ErrorKind::Timeout,
            VdipError::LineOverflow(_)
            | VdipError::SyncFailed(_)
            | VdipError::NoDisk
            | VdipError::DirNotFound { .. }
            | VdipError::FileNotFound(_)
            | VdipError::CommandFailed { .. }
            | VdipError::UnexpectedResponse { .. }
            | VdipError::ShortField { .. } => ErrorKind::Protocol,
            VdipError::InvalidArgument(_)
            | VdipError::InvalidPort(_)
            | VdipError::Io(_)
            | VdipError::Json(_)
            | VdipError::Serial(_) => ErrorKind::Host,
        }
    }

    /// True if the session has to be re-synchronized before further use.
    pub fn needs_resync(&self) -> bool {
        matches!(
            self,
            VdipError::Timeout(_) | VdipError::WriteFailed { .. } | VdipError::LineOverflow(_)
        )
    }
}

/// Result type for VDIP operations.
pub type VdipResult<T> = Result<T, VdipError>;
