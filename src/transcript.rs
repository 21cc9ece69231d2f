//! Session transcripts
//!
//! A transcript is the ordered, append-only record of everything that
//! happened in a session: user prompts with their send-time reference
//! resolutions, agent output, and terminal process-exit markers. The
//! transcript is also the source of the accumulated prompt delivered to
//! the subprocess on each send.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::reference::{Citation, FileReference, ReferenceFailure};

// ============================================================================
// Records
// ============================================================================

/// Who produced a message record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Text sent by the caller
    User,
    /// Text produced by the gemini subprocess
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// Process exited on its own
    Exited {
        /// Exit code, `None` when the platform reported none (signal death)
        code: Option<i32>,
    },
    /// Invocation was cancelled before the process finished
    Cancelled,
    /// Invocation failed on this side of the pipe (spawn I/O, oversized line)
    Failed {
        /// Failure description
        reason: String,
    },
}

impl InvocationOutcome {
    /// Whether this outcome is a clean zero exit
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) })
    }
}

impl fmt::Display for InvocationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::Exited { code: None } => write!(f, "exited without a code"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// One user or agent turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Who produced the text
    pub role: Role,
    /// Literal message text
    pub text: String,
    /// References the message was sent with
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<FileReference>,
    /// Send-time resolved reference content
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// References that failed to resolve
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ReferenceFailure>,
    /// True when the producing invocation was cancelled or failed mid-stream
    #[serde(default)]
    pub incomplete: bool,
    /// When the record was appended
    pub timestamp: DateTime<Utc>,
}

/// One transcript entry: a conversation turn or a process lifecycle marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// A user or agent message
    Message(MessageRecord),
    /// Terminal marker recording how an invocation ended
    ProcessExit {
        /// How the process ended
        outcome: InvocationOutcome,
        /// Tail of captured stderr, kept for non-zero exits
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        /// When the invocation ended
        timestamp: DateTime<Utc>,
    },
}

// ============================================================================
// Transcript
// ============================================================================

/// Append-only ordered record store for one session
///
/// Records are never mutated once appended. Interior locking keeps append
/// and snapshot safe from both sync and async contexts.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user message with its send-time resolution results
    pub fn push_user(
        &self,
        text: impl Into<String>,
        references: Vec<FileReference>,
        citations: Vec<Citation>,
        failures: Vec<ReferenceFailure>,
    ) {
        self.entries
            .lock()
            .push(TranscriptEntry::Message(MessageRecord {
                role: Role::User,
                text: text.into(),
                references,
                citations,
                failures,
                incomplete: false,
                timestamp: Utc::now(),
            }));
    }

    /// Append an agent message
    ///
    /// `incomplete` marks output cut short by cancellation or failure.
    pub fn push_agent(&self, text: impl Into<String>, incomplete: bool) {
        self.entries
            .lock()
            .push(TranscriptEntry::Message(MessageRecord {
                role: Role::Agent,
                text: text.into(),
                references: Vec::new(),
                citations: Vec::new(),
                failures: Vec::new(),
                incomplete,
                timestamp: Utc::now(),
            }));
    }

    /// Append a terminal process exit marker
    pub fn push_exit(&self, outcome: InvocationOutcome, stderr: Option<String>) {
        self.entries.lock().push(TranscriptEntry::ProcessExit {
            outcome,
            stderr,
            timestamp: Utc::now(),
        });
    }

    /// Number of entries appended so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the transcript has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of all entries in append order
    #[must_use]
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }

    /// Render the accumulated conversation as the prompt text delivered to
    /// the subprocess
    ///
    /// Message records render as `user:` / `agent:` turns. Citations render
    /// under the user text as fenced blocks labelled with the tag; failed
    /// references render as `[unresolved ...]` markers. Interrupted agent
    /// turns carry an `[interrupted]` marker. Process exit markers are
    /// bookkeeping and are excluded.
    #[must_use]
    pub fn render_prompt(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::new();
        for entry in entries.iter() {
            let TranscriptEntry::Message(record) = entry else {
                continue;
            };
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("{}: {}", record.role, record.text));
            if record.incomplete {
                out.push_str(" [interrupted]");
            }
            out.push('\n');
            for citation in &record.citations {
                out.push_str(&format!(
                    "{}:\n```\n{}\n```\n",
                    citation.reference, citation.content
                ));
            }
            for failure in &record.failures {
                out.push_str(&format!(
                    "[unresolved {}: {}]\n",
                    failure.reference, failure.reason
                ));
            }
        }
        out
    }
}
