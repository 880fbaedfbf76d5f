use std::error::Error;
use thiserror::Error;

/// Result alias for match-store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by match-store backends regardless of the engine behind
/// them.
///
/// The coordinator treats every variant as "persistence is down": settings
/// writes roll back the in-memory room, bookkeeping writes (participants,
/// host changes, playlist order) are logged and dropped.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("match store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Wrap a backend failure with the room or playlist operation that hit it.
    pub fn unavailable(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        StorageError::Unavailable {
            message: message.into(),
            source: Box::new(source),
        }
    }
}
