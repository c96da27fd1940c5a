/// Failures raised inside the storage layer.
///
/// Stores resolve these to absence or a no-op at their public boundary;
/// substrates and internal helpers propagate them with `?`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("item not found")]
    ItemNotFound,
    #[error("item already exists")]
    DuplicateItem,
    #[error("{message}")]
    Persistence { message: String },
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("mutex poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl StorageError {
    pub(crate) fn persistence(context: &str, error: impl std::fmt::Display) -> Self {
        Self::Persistence {
            message: format!("{context}: {error}"),
        }
    }

    /// Expected absence rather than a substrate fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ItemNotFound)
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
