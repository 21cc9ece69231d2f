//! Session state structures
//!
//! Defines the identifier, lifecycle state, and shared per-session data
//! the manager keeps for each open session.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::transcript::Transcript;

use super::stream::InvocationLog;

// ============================================================================
// Identifiers
// ============================================================================

/// Session ID newtype for type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh unique session ID
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a session ID from an existing string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the session ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ============================================================================
// Lifecycle state
// ============================================================================

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No invocation in flight
    Idle,
    /// An invocation is running
    Running,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
        }
    }
}

// ============================================================================
// Shared session data
// ============================================================================

/// Mutable session state guarded by the session lock
pub(super) struct SessionInner {
    /// Working directory bound to subsequent invocations
    pub working_dir: PathBuf,

    /// Current lifecycle state
    pub state: SessionState,

    /// Output log of the current or most recent invocation
    pub current: Option<Arc<InvocationLog>>,

    /// Cancellation handle for the in-flight invocation
    pub cancel: Option<CancellationToken>,
}

/// Per-session data shared between the registry and background tasks
pub(super) struct SessionShared {
    /// Unique session identifier
    pub id: SessionId,

    /// When the session was opened
    pub created_at: DateTime<Utc>,

    /// Append-only session transcript
    pub transcript: Transcript,

    /// Lock-guarded mutable state
    pub inner: Mutex<SessionInner>,
}

// ============================================================================
// Snapshots
// ============================================================================

/// Point-in-time snapshot of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier
    pub session_id: SessionId,
    /// Current lifecycle state
    pub state: SessionState,
    /// Working directory bound to subsequent invocations
    pub working_directory: PathBuf,
    /// Number of transcript entries so far
    pub transcript_len: usize,
    /// When the session was opened
    pub created_at: DateTime<Utc>,
}
