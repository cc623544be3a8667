//! Error types for the session repository and the remote store boundary.

/// Faults reported by a [`RemoteStore`](crate::RemoteStore).
///
/// Lock contention, replica pulls and missing objects are not faults; they
/// come back as outcome variants. Anything here is logged by the repository
/// and degraded to a neutral result.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist and the caller did not tolerate absence.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The store cannot be reached or refused the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The queried index field is not maintained by the store.
    #[error("Unknown index field: {0}")]
    UnknownIndex(String),

    /// The named remote store could not be attached to the namespace.
    #[error("Remote store '{0}' could not be attached")]
    RemoteStore(String),

    /// Session payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Error type for session repository operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A backoff wait was cancelled through the repository's shutdown token.
    #[error("Interrupted while waiting to retry access to session {0}")]
    Interrupted(String),

    /// The remote store failed during repository construction.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for session repository operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for remote store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
