//! Error types for mdman

/// Result type for mdman operations
pub type Result<T> = std::result::Result<T, MdError>;

/// mdman-specific errors
#[derive(Debug, thiserror::Error)]
pub enum MdError {
    /// Invalid directive value or malformed block in configuration text
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The store could not be persisted after a merge
    #[error("Store write failed: {0}")]
    StoreWriteError(String),

    /// No record under the given name
    #[error("No managed domain named '{0}'")]
    NotFound(String),

    /// Store directory could not be read
    #[error("Store read failed: {0}")]
    StoreReadError(String),
}

impl MdError {
    /// Status code reported in the CLI JSON envelope
    pub fn status_code(&self) -> i32 {
        match self {
            MdError::ConfigError(_) => 2,
            MdError::StoreWriteError(_) => 3,
            MdError::StoreReadError(_) => 3,
            MdError::NotFound(_) => 1,
        }
    }
}
