//! Error types for kvbase-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("allocation failed: {0}")]
    Alloc(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("corrupt database file: {0}")]
    Corrupt(String),

    #[error("entry not present")]
    NotPresent,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Integer protocol of the original C library, for callers that speak
    /// it (the CLI turns this into a process exit status).
    ///
    /// `NotPresent` maps to -1: the C library reports a delete of a
    /// missing key with its I/O sentinel, and the integer boundary stays
    /// wire compatible with that.
    pub fn code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::NotPresent => -1,
            Error::Alloc(_) => -2,
            Error::InvalidParameters(_) => -3,
            Error::Corrupt(_) => -4,
        }
    }
}

impl From<binrw::Error> for Error {
    fn from(e: binrw::Error) -> Self {
        match e {
            binrw::Error::Io(io) => Error::Io(io),
            other => Error::Corrupt(other.to_string()),
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(e: std::collections::TryReserveError) -> Self {
        Error::Alloc(e.to_string())
    }
}
