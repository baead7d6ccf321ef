use kvobj_store::{KeyKind, StoreError};

/// Errors surfaced by the object accessors.
///
/// Absent fields, empty queues and elapsed waits are not errors: those
/// operations return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    /// The key is already in use as a different collection type.
    #[error("key {key:?} does not hold a {expected}")]
    TypeMismatch { key: String, expected: KeyKind },

    /// The store could not be reached. Never retried by this layer.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The caller's value could not be encoded; nothing was written.
    #[error("cannot encode value: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Bytes read from the store do not decode into the requested type.
    #[error("cannot decode value stored at {key:?}: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Priorities must be comparable numbers.
    #[error("invalid priority: {0}")]
    InvalidPriority(f64),

    /// Configuration could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any other store failure, propagated unchanged.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ObjectError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TypeMismatch { key, expected } => Self::TypeMismatch { key, expected },
            StoreError::Unavailable(reason) => Self::StoreUnavailable(reason),
            StoreError::InvalidScore(score) => Self::InvalidPriority(score),
            other => Self::Store(other),
        }
    }
}

/// Result alias for accessor operations.
pub type ObjectResult<T> = Result<T, ObjectError>;
