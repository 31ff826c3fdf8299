//! Error types for remind.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Resource errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    // Validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // External service errors
    #[error(transparent)]
    Llm(#[from] remind_llm::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] remind_storage::Error),
}

impl Error {
    /// Whether the error came from the language model.
    pub fn is_llm(&self) -> bool {
        matches!(self, Error::Llm(_))
    }
}
