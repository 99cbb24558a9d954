//! Error types for storage operations

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database connection failed
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    /// Database query failed
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be mapped back to a probe record
    #[error("corrupt probe record: {0}")]
    SerializationError(String),

    /// I/O error (file access, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The backend has been closed
    #[error("storage backend closed")]
    Closed,
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::PoolClosed => StorageError::Closed,
            sqlx::Error::RowNotFound => StorageError::QueryFailed("no rows found".to_string()),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
