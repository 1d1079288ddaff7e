use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value could not be encoded or decoded.
    #[error("invalid session value for {key}: {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The connection mutex was poisoned by a panicking holder.
    #[error("session store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, SessionError>;
