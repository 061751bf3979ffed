//! Error types shared by every crate in the workspace.

use std::io;
use thiserror::Error;

/// The error type returned by boundary operations (argument parsing, file and
/// zip I/O, and data validation).
///
/// Cryptanalytic failure is not represented here: `attack()` and
/// `recover_password()` report "no solution" as an empty result vector, not
/// as an error.
#[derive(Debug, Error)]
pub enum Error {
    /// An argument or combination of arguments is invalid.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// I/O failure while reading or writing a file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The zip archive is malformed or uses an unsupported feature.
    #[error("zip error: {0}")]
    Zip(String),

    /// The supplied plaintext/ciphertext/offset data cannot be used to carry
    /// out an attack.
    #[error("data error: {0}")]
    Data(String),
}

/// Result type alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build an [`Error::InvalidArguments`].
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    /// Build an [`Error::Zip`].
    pub fn zip(message: impl Into<String>) -> Self {
        Self::Zip(message.into())
    }

    /// Build an [`Error::Data`].
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }
}
