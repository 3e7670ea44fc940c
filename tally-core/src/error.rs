use std::io;
use thiserror::Error;

/// Reasons a mutation is refused before any state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("insufficient stock for {category}: available {available}, requested {requested}")]
    InsufficientStock {
        category: String,
        available: String,
        requested: String,
    },

    #[error("missing counterparty for {0}")]
    MissingCounterparty(&'static str),

    #[error("quantity must be positive, got {0}")]
    NonPositiveQuantity(String),

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(String),

    #[error("record {0} is already returned")]
    AlreadyReturned(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("no authenticated tenant")]
    Unauthenticated,

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("network error: {0}")]
    Network(String),

    #[error("remote rejected the request ({code}): {message}")]
    RemoteRejected { code: String, message: String },

    #[error("storage engine error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    /// These codes are stable and can be used by the UI for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthenticated => "UNAUTHENTICATED",
            Error::Validation(_) => "VALIDATION",
            Error::Network(_) => "NETWORK",
            Error::RemoteRejected { .. } => "REMOTE_REJECTED",
            Error::Storage(_) => "STORAGE",
            Error::Io(_) => "IO_ERROR",
            Error::Corruption(_) => "CORRUPTION",
            Error::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Error::Serialization(_) => "SERIALIZATION",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the failure is connectivity-shaped and the write should fall
    /// back to the durable queue instead of propagating.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Returns true if this error is potentially retryable.
    ///
    /// Only network-class failures are retried; a rejection from the remote
    /// store would fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,

            Error::Unauthenticated => false,
            Error::Validation(_) => false,
            Error::RemoteRejected { .. } => false,
            Error::Storage(_) => false,
            Error::Io(_) => false,
            Error::Corruption(_) => false,
            Error::ChecksumMismatch => false,
            Error::Serialization(_) => false,
            Error::InvalidArgument(_) => false,
            Error::Internal(_) => false,
        }
    }

    /// Storage-layer failures are what the UI reports as "could not save".
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Io(_) | Error::Corruption(_) | Error::ChecksumMismatch
        )
    }

    /// Adds context to an error by wrapping it in a storage error.
    ///
    /// Used when a local durable-store failure propagates up through the
    /// repository so the caller sees which operation could not be queued.
    pub fn with_context(self, context: &str) -> Error {
        Error::Storage(format!("{}: {}", context, self))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
