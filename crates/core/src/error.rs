//! Data-access error model.

use thiserror::Error;

/// Result type used across the data-access layer.
pub type DataResult<T> = Result<T, DataError>;

/// Coarse classification of a [`DataError`].
///
/// Callers branch on the kind rather than on the message payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    DuplicateKey,
    AlreadyTracked,
    Unsupported,
    CommitFailed,
    Configuration,
    Store,
    InvalidData,
}

/// Failure reported by a storage engine.
///
/// These are **infrastructure errors** raised by a `DataStore`
/// implementation, as opposed to tracking or mapping errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness/integrity constraint rejected the change.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The persisted row no longer matches what the change expected.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// Raw query text could not be interpreted by the backend.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Transport or driver failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Data-access error.
///
/// Every error propagates to the immediate caller; nothing in this layer
/// retries or suppresses failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    /// Lookup by key found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insert collided with an identity already in the tracked-set.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Attach of an entity whose identity is already tracked.
    #[error("already tracked: {0}")]
    AlreadyTracked(String),

    /// Operation not provided by this component.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The store rejected the atomic flush; no tracking state was advanced.
    #[error("commit failed")]
    CommitFailed(#[source] StoreError),

    /// Mapping or selector configuration cannot be resolved.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Store failure outside of a commit.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A row could not be converted to or from an entity.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl DataError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn duplicate_key(msg: impl Into<String>) -> Self {
        Self::DuplicateKey(msg.into())
    }

    pub fn already_tracked(msg: impl Into<String>) -> Self {
        Self::AlreadyTracked(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DuplicateKey(_) => ErrorKind::DuplicateKey,
            Self::AlreadyTracked(_) => ErrorKind::AlreadyTracked,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::CommitFailed(_) => ErrorKind::CommitFailed,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Store(_) => ErrorKind::Store,
            Self::InvalidData(_) => ErrorKind::InvalidData,
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidData(value.to_string())
    }
}
