//! Invocation output log and stream handles
//!
//! Every invocation records its output chunks in an append-only log. An
//! `OutputStream` is an independent cursor over that log: it replays what
//! was already recorded, then follows live output until the invocation
//! ends. Any number of handles observe the same chunks in the same order.

use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::transcript::InvocationOutcome;

// ============================================================================
// Invocation log
// ============================================================================

#[derive(Debug, Default)]
struct LogInner {
    chunks: Vec<String>,
    outcome: Option<InvocationOutcome>,
    finished: bool,
}

/// Shared recording of one invocation's output
///
/// Chunks are appended in production order and never mutated afterwards.
#[derive(Debug, Default)]
pub(super) struct InvocationLog {
    inner: Mutex<LogInner>,
    notify: Notify,
}

impl InvocationLog {
    /// Create a log for a new invocation
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a log that is already finished with no recorded output
    ///
    /// Used for sessions that never ran an invocation.
    pub fn closed_empty() -> Arc<Self> {
        let log = Self::default();
        log.inner.lock().finished = true;
        Arc::new(log)
    }

    /// Append one output chunk and wake waiting streams
    pub fn push_chunk(&self, chunk: String) {
        {
            let mut inner = self.inner.lock();
            if inner.finished {
                return;
            }
            inner.chunks.push(chunk);
        }
        self.notify.notify_waiters();
    }

    /// Mark the invocation ended and wake waiting streams
    ///
    /// The caller must have settled the session transcript and state
    /// first; waiters unblocked here read both.
    pub fn finish(&self, outcome: InvocationOutcome) {
        {
            let mut inner = self.inner.lock();
            inner.outcome = Some(outcome);
            inner.finished = true;
        }
        self.notify.notify_waiters();
    }

    /// Snapshot of all chunks recorded so far
    pub fn chunks(&self) -> Vec<String> {
        self.inner.lock().chunks.clone()
    }

    /// Outcome of the invocation once it has ended
    pub fn outcome(&self) -> Option<InvocationOutcome> {
        self.inner.lock().outcome.clone()
    }

    /// Whether the invocation has ended
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Wait for the chunk at `index`, or `None` once the log has finished
    /// without reaching it
    pub async fn chunk_at(&self, index: usize) -> Option<String> {
        loop {
            // Register the waiter before checking state so a concurrent
            // notify_waiters cannot slip between check and await.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock();
                if let Some(chunk) = inner.chunks.get(index) {
                    return Some(chunk.clone());
                }
                if inner.finished {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Wait until the invocation has ended, returning its outcome
    ///
    /// `None` only for logs created already finished.
    pub async fn wait_finished(&self) -> Option<InvocationOutcome> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock();
                if inner.finished {
                    return inner.outcome.clone();
                }
            }

            notified.await;
        }
    }
}

// ============================================================================
// Output stream
// ============================================================================

/// Read handle over one invocation's output
///
/// Each handle starts at the beginning of the invocation and replays
/// recorded chunks before following live output. Handles are independent;
/// consuming one does not affect another. Cloning yields a handle that
/// continues from the same position.
#[derive(Debug, Clone)]
pub struct OutputStream {
    log: Arc<InvocationLog>,
    cursor: usize,
}

impl OutputStream {
    /// Create a stream handle positioned at the start of the log
    pub(super) fn new(log: Arc<InvocationLog>) -> Self {
        Self { log, cursor: 0 }
    }

    /// Next output chunk, or `None` once the invocation has ended
    pub async fn next_chunk(&mut self) -> Option<String> {
        let chunk = self.log.chunk_at(self.cursor).await?;
        self.cursor += 1;
        Some(chunk)
    }

    /// How the invocation ended, `None` while it is still running or when
    /// the session never ran one
    #[must_use]
    pub fn outcome(&self) -> Option<InvocationOutcome> {
        self.log.outcome()
    }

    /// Whether the invocation has ended
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.log.is_finished()
    }

    /// Collect every remaining chunk until the invocation ends
    pub async fn collect_remaining(&mut self) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    /// Adapt into a `futures::Stream` of chunks
    #[must_use]
    pub fn into_stream(mut self) -> impl Stream<Item = String> {
        async_stream::stream! {
            while let Some(chunk) = self.next_chunk().await {
                yield chunk;
            }
        }
    }
}
