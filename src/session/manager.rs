//! Session manager for concurrent Gemini CLI sessions
//!
//! Provides the public lifecycle API: open sessions bound to a working
//! directory, send prompts that run one subprocess invocation each,
//! stream invocation output, cancel, and close.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::GeminiAgentOptions;
use crate::error::{GeminiError, Result};
use crate::launcher;
use crate::reference::{self, FileReference};
use crate::transcript::{InvocationOutcome, Transcript, TranscriptEntry};

use super::invocation::Invocation;
use super::state::{SessionId, SessionInfo, SessionInner, SessionShared, SessionState};
use super::stream::{InvocationLog, OutputStream};

// ============================================================================
// SESSION MANAGER
// ============================================================================

/// Manager for multiple concurrent Gemini CLI sessions
///
/// The `SessionManager` coordinates independent sessions, handling:
/// - Session lifecycle (open, send, cancel, close)
/// - At most one child process per session, concurrent across sessions
/// - Send-time reference resolution against the session working directory
/// - Append-only transcripts with terminal process-exit records
pub struct SessionManager {
    options: GeminiAgentOptions,
    sessions: Arc<Mutex<HashMap<SessionId, Arc<SessionShared>>>>,
}

impl SessionManager {
    /// Create a manager with default options
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(GeminiAgentOptions::default())
    }

    /// Create a manager with the given options
    #[must_use]
    pub fn with_options(options: GeminiAgentOptions) -> Self {
        Self {
            options,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The options invocations are launched with
    #[must_use]
    pub fn options(&self) -> &GeminiAgentOptions {
        &self.options
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Gracefully shut down the manager
    ///
    /// Closes every open session, cancelling in-flight invocations and
    /// waiting for their children to die.
    pub async fn shutdown(&self) -> Result<()> {
        log::info!("shutting down session manager");

        let session_ids: Vec<SessionId> = {
            let sessions = self.sessions.lock().await;
            sessions.keys().cloned().collect()
        };

        for session_id in session_ids {
            log::debug!("[{session_id}] closing session");
            if let Err(e) = self.close_session(&session_id).await {
                log::warn!("[{session_id}] failed to close session: {e}");
            }
        }

        log::info!("session manager shutdown complete");
        Ok(())
    }
}

impl SessionManager {
    /// Open a new session bound to a working directory
    ///
    /// With `None` the process current directory is used. The directory is
    /// validated up front; nothing is spawned until the first send.
    ///
    /// # Errors
    /// Returns `GeminiError::InvalidDirectory` if the directory does not
    /// exist, is not a directory, or is not readable.
    pub async fn open_session(&self, working_directory: Option<PathBuf>) -> Result<SessionId> {
        let working_dir = match working_directory {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        validate_working_directory(&working_dir)?;

        let id = SessionId::generate();
        let session = Arc::new(SessionShared {
            id: id.clone(),
            created_at: Utc::now(),
            transcript: Transcript::new(),
            inner: Mutex::new(SessionInner {
                working_dir,
                state: SessionState::Idle,
                current: None,
                cancel: None,
            }),
        });

        self.sessions.lock().await.insert(id.clone(), session);
        log::info!("[{id}] session opened");
        Ok(id)
    }

    /// Rebind the session working directory for subsequent invocations
    ///
    /// An in-flight invocation is unaffected; its child captured the
    /// previous directory at spawn. On failure the previous directory
    /// stays bound.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id and `InvalidDirectory`
    /// for a path that does not validate.
    pub async fn set_working_directory(
        &self,
        id: &SessionId,
        path: impl Into<PathBuf>,
    ) -> Result<()> {
        let session = self.get_session(id).await?;
        let path = path.into();
        validate_working_directory(&path)?;

        let mut inner = session.inner.lock().await;
        log::debug!(
            "[{id}] working directory {} -> {}",
            inner.working_dir.display(),
            path.display()
        );
        inner.working_dir = path;
        Ok(())
    }

    /// Send a prompt, launching one subprocess invocation
    ///
    /// The user record is appended with its send-time reference
    /// resolutions, the accumulated conversation is rendered and delivered
    /// on the child's stdin, and the call returns immediately with a
    /// stream over the invocation's output. Reference resolution failures
    /// are recorded inline and never abort the send. The appended record
    /// stays in the transcript even when the launch itself fails.
    ///
    /// # Errors
    /// Returns `SessionBusy` while an invocation is in flight,
    /// `BinaryNotFound` when the external command cannot be resolved or
    /// executed, and `SessionNotFound` for an unknown id.
    pub async fn send(
        &self,
        id: &SessionId,
        text: &str,
        references: &[FileReference],
    ) -> Result<OutputStream> {
        let session = self.get_session(id).await?;

        let mut inner = session.inner.lock().await;
        if inner.state == SessionState::Running {
            return Err(GeminiError::session_busy(id.as_str()));
        }

        // Resolve references against the directory bound right now
        let (citations, failures) = reference::resolve_all(references, &inner.working_dir);
        if !failures.is_empty() {
            log::warn!("[{id}] {} reference(s) failed to resolve", failures.len());
        }
        session
            .transcript
            .push_user(text, references.to_vec(), citations, failures);

        let prompt = session.transcript.render_prompt();

        let binary = launcher::resolve_command(&self.options)?;
        let child = launcher::spawn_invocation(&binary, &inner.working_dir, &self.options)?;

        let log = InvocationLog::new();
        let cancel = CancellationToken::new();

        let invocation = Invocation {
            child,
            prompt,
            log: Arc::clone(&log),
            cancel: cancel.clone(),
            cancel_grace: self.options.cancel_grace,
            max_line_len: self.options.max_line_len,
            session_id: id.to_string(),
        };

        inner.state = SessionState::Running;
        inner.current = Some(Arc::clone(&log));
        inner.cancel = Some(cancel);
        drop(inner);

        log::info!("[{id}] invocation started with {}", binary.display());

        let session_bg = Arc::clone(&session);
        let log_bg = Arc::clone(&log);
        tokio::spawn(async move {
            let (outcome, stderr_tail) = invocation.drive().await;
            finalize_invocation(&session_bg, &log_bg, outcome, stderr_tail).await;
        });

        Ok(OutputStream::new(log))
    }

    /// Stream the output of the current or most recent invocation
    ///
    /// The stream replays recorded chunks from the beginning and then
    /// follows live output; it ends when the invocation ends. A session
    /// that never ran yields an empty, already-finished stream.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn stream_output(&self, id: &SessionId) -> Result<OutputStream> {
        let session = self.get_session(id).await?;
        let inner = session.inner.lock().await;
        let log = match &inner.current {
            Some(log) => Arc::clone(log),
            None => InvocationLog::closed_empty(),
        };
        Ok(OutputStream::new(log))
    }

    /// Cancel the in-flight invocation, if any
    ///
    /// Escalates from a graceful signal to a hard kill after the
    /// configured grace period and returns once the session has settled
    /// back to idle with its transcript final. Idempotent; cancelling an
    /// idle session is a no-op.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn cancel(&self, id: &SessionId) -> Result<()> {
        let session = self.get_session(id).await?;
        if let Some(outcome) = cancel_invocation(&session).await {
            log::info!("[{id}] invocation ended after cancel: {outcome}");
        }
        Ok(())
    }

    /// Close a session, cancelling any in-flight invocation
    ///
    /// Every subsequent operation on the id fails with `SessionNotFound`.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn close_session(&self, id: &SessionId) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| GeminiError::session_not_found(id.as_str()))?;

        // The id is gone from the registry; tear the child down before
        // reporting the close complete
        if let Some(outcome) = cancel_invocation(&session).await {
            log::debug!("[{id}] invocation ended during close: {outcome}");
        }

        log::info!("[{id}] session closed");
        Ok(())
    }

    /// Get a point-in-time snapshot of one session
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn session_info(&self, id: &SessionId) -> Result<SessionInfo> {
        let session = self.get_session(id).await?;
        let inner = session.inner.lock().await;
        Ok(SessionInfo {
            session_id: session.id.clone(),
            state: inner.state,
            working_directory: inner.working_dir.clone(),
            transcript_len: session.transcript.len(),
            created_at: session.created_at,
        })
    }

    /// List all open sessions, oldest first
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<SessionShared>> =
            self.sessions.lock().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            let inner = session.inner.lock().await;
            infos.push(SessionInfo {
                session_id: session.id.clone(),
                state: inner.state,
                working_directory: inner.working_dir.clone(),
                transcript_len: session.transcript.len(),
                created_at: session.created_at,
            });
        }

        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    /// Snapshot of a session's transcript in append order
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id.
    pub async fn transcript_snapshot(&self, id: &SessionId) -> Result<Vec<TranscriptEntry>> {
        let session = self.get_session(id).await?;
        Ok(session.transcript.snapshot())
    }

    /// Look up a session by id
    async fn get_session(&self, id: &SessionId) -> Result<Arc<SessionShared>> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GeminiError::session_not_found(id.as_str()))
    }
}

// ============================================================================
// PRIVATE HELPER FUNCTIONS
// ============================================================================

/// Validate a path as a usable session working directory
fn validate_working_directory(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(GeminiError::invalid_directory(path, "does not exist"));
    }
    if !path.is_dir() {
        return Err(GeminiError::invalid_directory(path, "not a directory"));
    }
    // A directory we cannot list cannot serve as a child cwd
    if let Err(e) = std::fs::read_dir(path) {
        return Err(GeminiError::invalid_directory(
            path,
            format!("not readable: {e}"),
        ));
    }
    Ok(())
}

/// Settle a finished invocation into its session
///
/// Appends the agent record and the process-exit marker, flips the session
/// back to idle, and only then finishes the log. Anyone unblocked by the
/// finished log observes the settled transcript and state.
async fn finalize_invocation(
    session: &SessionShared,
    log: &InvocationLog,
    outcome: InvocationOutcome,
    stderr_tail: Option<String>,
) {
    let output = log.chunks().join("\n");
    let incomplete = matches!(
        outcome,
        InvocationOutcome::Cancelled | InvocationOutcome::Failed { .. }
    );
    if !output.is_empty() {
        session.transcript.push_agent(output, incomplete);
    }

    let stderr = if outcome.is_success() {
        None
    } else {
        stderr_tail
    };
    session.transcript.push_exit(outcome.clone(), stderr);

    {
        let mut inner = session.inner.lock().await;
        inner.state = SessionState::Idle;
        inner.cancel = None;
    }

    log::debug!("[{}] invocation finished: {outcome}", session.id);
    log.finish(outcome);
}

/// Cancel the in-flight invocation of a session, if any, and wait for it
/// to settle
async fn cancel_invocation(session: &SessionShared) -> Option<InvocationOutcome> {
    let pending = {
        let inner = session.inner.lock().await;
        match (&inner.cancel, &inner.current) {
            (Some(cancel), Some(log)) => Some((cancel.clone(), Arc::clone(log))),
            _ => None,
        }
    };

    // Idle sessions have nothing to cancel
    let (cancel, log) = pending?;
    cancel.cancel();
    log.wait_finished().await
}
