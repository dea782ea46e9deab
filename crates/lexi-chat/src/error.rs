//! Error types for lexi-chat

use thiserror::Error;

/// Result type alias using lexi-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during conversation operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the AI vendor layer
    #[error(transparent)]
    Ai(#[from] lexi_ai::Error),

    /// The settings store could not be read or written
    #[error("Settings error: {0}")]
    Settings(String),
}

impl Error {
    /// Whether this error came from a cancelled request
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Ai(lexi_ai::Error::Aborted))
    }
}
