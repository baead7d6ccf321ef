use crate::types::KeyKind;

/// Errors from primitive store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key holds a different collection type than the operation expects.
    #[error("key {key:?} does not hold a {expected}")]
    TypeMismatch { key: String, expected: KeyKind },

    /// Sorted-set scores must be comparable numbers.
    #[error("invalid score: {0}")]
    InvalidScore(f64),

    /// Connectivity or transport failure talking to the store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the command or answered with something unexpected.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn type_mismatch(key: &str, expected: KeyKind) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            expected,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
