use std::io;
use thiserror::Error;

/// Coarse classification of an [`EcgError`].
///
/// Format auto-detection and batch conversion use this to decide whether to
/// try the next codec (`FormatMismatch`), abort with a diagnostic
/// (`StructuralInvariantViolation`, `IntegrityCheckFailure`) or retry with
/// more data (`TruncatedInput`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    FormatMismatch,
    StructuralInvariantViolation,
    IntegrityCheckFailure,
    TruncatedInput,
    IoFailure,
    ConfigurationInvalid,
    InvalidArgument,
}

#[derive(Debug, Error)]
pub enum EcgError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Stream unreadable: {0}")]
    StreamUnreadable(String),

    #[error("Bad magic: expected \"ISHNE1.0\", found {0:?}")]
    BadMagic(String),

    #[error("No codec recognised the input")]
    UnknownFormat,

    #[error("Header truncated: expected {expected} bytes, got {actual}")]
    HeaderTruncated { expected: usize, actual: usize },

    #[error("Malformed header: {0}")]
    HeaderMalformed(String),

    #[error("Header invariant failed: {0}")]
    HeaderInvariantFailed(String),

    #[error("Variable block truncated: expected {expected} bytes, got {actual}")]
    VariableBlockTruncated { expected: usize, actual: usize },

    #[error("CRC mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    CrcMismatch { stored: u32, computed: u32 },

    #[error("Signal window [{start}, {end}) truncated: needed {expected} bytes, got {actual}")]
    SignalWindowTruncated { start: usize, end: usize, expected: usize, actual: usize },

    #[error("Write target unwritable: {0}")]
    WriteTargetUnwritable(String),

    #[error("Record out of bounds: offset {offset} + length {length} exceeds buffer of {available} bytes")]
    RecordOutOfBounds { offset: usize, length: usize, available: usize },

    #[error("Record field '{field}': {reason}")]
    RecordField { field: String, reason: String },

    #[error("Invalid configuration value for '{key}': {value:?}")]
    InvalidConfiguration { key: String, value: String },

    #[error("Unknown CRC algorithm: {0}")]
    UnknownCrcAlgorithm(String),

    #[error("Lead index {0} out of range")]
    InvalidLeadIndex(usize),

    #[error("Invalid signals: {0}")]
    InvalidSignals(String),

    #[error("Object is not in a working state")]
    NotWorking,
}

impl EcgError {
    /// Maps the error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EcgError::BadMagic(_) | EcgError::UnknownFormat => ErrorKind::FormatMismatch,
            EcgError::HeaderMalformed(_)
            | EcgError::HeaderInvariantFailed(_)
            | EcgError::RecordField { .. }
            | EcgError::InvalidSignals(_)
            | EcgError::NotWorking => ErrorKind::StructuralInvariantViolation,
            EcgError::CrcMismatch { .. } => ErrorKind::IntegrityCheckFailure,
            EcgError::HeaderTruncated { .. }
            | EcgError::VariableBlockTruncated { .. }
            | EcgError::SignalWindowTruncated { .. }
            | EcgError::RecordOutOfBounds { .. } => ErrorKind::TruncatedInput,
            EcgError::Io(_)
            | EcgError::StreamUnreadable(_)
            | EcgError::WriteTargetUnwritable(_) => ErrorKind::IoFailure,
            EcgError::InvalidConfiguration { .. } | EcgError::UnknownCrcAlgorithm(_) => {
                ErrorKind::ConfigurationInvalid
            }
            EcgError::InvalidLeadIndex(_) => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, EcgError>;
