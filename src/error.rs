//! Error types for the Gemini agent session manager

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Gemini session operations
#[derive(Error, Debug)]
pub enum GeminiError {
    /// Gemini CLI binary not found or not executable
    #[error("Gemini CLI not found: {0}")]
    BinaryNotFound(String),

    /// Working directory does not exist, is not a directory, or is not readable
    #[error("Invalid working directory {}: {reason}", path.display())]
    InvalidDirectory {
        /// The rejected path
        path: PathBuf,
        /// Why the path was rejected
        reason: String,
    },

    /// Session id does not refer to an open session
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session already has an invocation in flight
    #[error("Session {0} is busy: an invocation is already running")]
    SessionBusy(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Gemini session operations
pub type Result<T> = std::result::Result<T, GeminiError>;

impl GeminiError {
    /// Create a binary not found error with install guidance
    #[must_use]
    pub fn binary_not_found() -> Self {
        Self::BinaryNotFound(
            "gemini not found. Install with:\n\
             npm install -g @google/gemini-cli\n\
             \n\
             If already installed locally, try:\n\
             export PATH=\"$HOME/node_modules/.bin:$PATH\"\n\
             \n\
             Or set gemini_command to the binary path"
                .to_string(),
        )
    }

    /// Create a binary not found error for a specific command path
    pub fn binary_not_found_at(command: impl Into<String>) -> Self {
        Self::BinaryNotFound(format!("{} is not an executable file", command.into()))
    }

    /// Create an invalid directory error
    pub fn invalid_directory(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidDirectory {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound(session_id.into())
    }

    /// Create a session busy error
    pub fn session_busy(session_id: impl Into<String>) -> Self {
        Self::SessionBusy(session_id.into())
    }
}
