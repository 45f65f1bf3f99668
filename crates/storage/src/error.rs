/// Error type for input and result storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Transient backend failure. Callers may retry.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The referenced input does not exist.
    #[error("Input not found: {0}")]
    NotFound(String),

    /// The reference is malformed or escapes the storage directory.
    #[error("Invalid input reference: {0}")]
    InvalidReference(String),

    #[error("Storage misconfigured: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether a retry could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Io(_))
    }
}
