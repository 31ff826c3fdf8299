//! Error types for remind-storage.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Record id cannot be used as a file name
    #[error("Invalid record id: {0}")]
    InvalidId(String),

    /// File exists but does not hold a valid record
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
