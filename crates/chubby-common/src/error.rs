//! Error types for the chubby storage layer
//!
//! Every failure surfaced by the storage components is mapped onto the
//! small taxonomy in [`ErrorKind`]. Engine-specific errors are converted at
//! the component boundary and never leak past it.

use thiserror::Error;

/// Common result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Namespace, key or slot absent
    NotFound,
    /// Something that may only exist once already does
    AlreadyExists,
    /// Caller passed something malformed
    InvalidArgument,
    /// The underlying engine or file system failed
    Internal,
    /// A stored record failed structural validation
    DataLoss,
}

/// Common error type for the storage layer
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("data loss: {0}")]
    DataLoss(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an already exists error
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a data loss error
    pub fn data_loss(msg: impl Into<String>) -> Self {
        Self::DataLoss(msg.into())
    }

    /// Map this error onto the storage error taxonomy
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidArgument(_) | Self::Configuration(_) => ErrorKind::InvalidArgument,
            Self::Internal(_) | Self::Io(_) => ErrorKind::Internal,
            Self::DataLoss(_) => ErrorKind::DataLoss,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if the caller may reasonably retry the operation.
    ///
    /// Only engine/file-system failures qualify; the storage layer never
    /// retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}
