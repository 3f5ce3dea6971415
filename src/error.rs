//! Error types for console operations

use std::io;

use thiserror::Error;

use crate::session::SessionState;

/// Console error type
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// No console is attached to the process (or it cannot be used as one)
    #[error("No console available: {0}")]
    UnavailableConsole(String),

    /// The OS rejected the requested mode combination
    #[error("Console rejected the requested mode: {0}")]
    UnsupportedMode(String),

    /// Operation attempted outside the Active state
    #[error("Operation not valid while the session is {0:?}")]
    InvalidState(SessionState),

    /// The process console is already held by another live session
    #[error("The process console is already claimed by an open session")]
    AlreadyOpen,

    /// Transient failure on a single read or write
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ConsoleError {
    /// Whether the caller may retry the call that produced this error
    pub fn is_transient(&self) -> bool {
        matches!(self, ConsoleError::Io(_))
    }
}

#[cfg(unix)]
impl From<nix::Error> for ConsoleError {
    fn from(err: nix::Error) -> Self {
        ConsoleError::Io(io::Error::from(err))
    }
}

/// Result type for console operations
pub type ConsoleResult<T> = std::result::Result<T, ConsoleError>;
