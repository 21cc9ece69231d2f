//! Driving one Gemini invocation
//!
//! Owns the child process for the duration of one send: prompt delivery
//! on stdin, line-framed output collection into the invocation log,
//! bounded stderr capture, cancellation, and outcome classification.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;

use crate::transcript::InvocationOutcome;

use super::stream::InvocationLog;

/// Captured stderr is trimmed to this many trailing bytes
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Everything one invocation needs from its session
pub(super) struct Invocation {
    /// Freshly spawned child with piped stdio
    pub child: Child,
    /// Rendered prompt delivered on stdin
    pub prompt: String,
    /// Log receiving output chunks
    pub log: Arc<InvocationLog>,
    /// Fires when the caller cancels
    pub cancel: CancellationToken,
    /// Grace period between the polite signal and a hard kill
    pub cancel_grace: Duration,
    /// Maximum accepted output line length
    pub max_line_len: usize,
    /// Owning session, for log messages
    pub session_id: String,
}

impl Invocation {
    /// Run the invocation to its end
    ///
    /// Returns how it ended together with the captured stderr tail. The
    /// child process is guaranteed dead on return.
    pub(super) async fn drive(mut self) -> (InvocationOutcome, Option<String>) {
        let Some(stdin) = self.child.stdin.take() else {
            let _ = self.child.kill().await;
            return (failed("stdin handle unavailable"), None);
        };
        let Some(stdout) = self.child.stdout.take() else {
            let _ = self.child.kill().await;
            return (failed("stdout handle unavailable"), None);
        };

        // Drain stderr from the start so the child can never block on it
        let stderr_task = self
            .child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr_tail(stderr)));

        let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(self.max_line_len));

        let outcome = run_to_completion(
            &mut self.child,
            stdin,
            self.prompt,
            &mut lines,
            &self.log,
            &self.cancel,
            self.cancel_grace,
            self.max_line_len,
            &self.session_id,
        )
        .await;

        // A grandchild holding the stderr fd open would keep the drain task
        // alive past the child's death; give it the grace period, no more
        let stderr_tail = match stderr_task {
            Some(mut task) => match tokio::time::timeout(self.cancel_grace, &mut task).await {
                Ok(result) => result.ok().filter(|tail| !tail.is_empty()),
                Err(_) => {
                    log::debug!("[{}] stderr drain outlived the child, aborting", self.session_id);
                    task.abort();
                    None
                }
            },
            None => None,
        };

        (outcome, stderr_tail)
    }
}

/// Deliver the prompt, stream output into the log, and classify the end
#[allow(clippy::too_many_arguments)]
async fn run_to_completion(
    child: &mut Child,
    mut stdin: ChildStdin,
    prompt: String,
    lines: &mut FramedRead<ChildStdout, LinesCodec>,
    log: &InvocationLog,
    cancel: &CancellationToken,
    cancel_grace: Duration,
    max_line_len: usize,
    session_id: &str,
) -> InvocationOutcome {
    // Prompt delivery races cancellation; a child that never drains its
    // stdin must not wedge the session
    tokio::select! {
        () = cancel.cancelled() => {
            log::debug!("[{session_id}] cancelled during prompt delivery");
            return terminate(child, cancel_grace, session_id).await;
        }
        result = async {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await
        } => {
            if let Err(e) = result {
                // A child may exit without draining stdin; its output and
                // exit status still count
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return failed(format!("failed to deliver prompt: {e}"));
                }
                log::debug!("[{session_id}] child closed stdin before the prompt was delivered");
            }
        }
    }
    // Stdin closes here; EOF tells the child the prompt is complete
    drop(stdin);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                log::debug!("[{session_id}] cancellation requested");
                return terminate(child, cancel_grace, session_id).await;
            }
            line = lines.next() => match line {
                Some(Ok(line)) => log.push_chunk(line),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return failed(format!("output line exceeded {max_line_len} bytes"));
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return failed(format!("failed to read output: {e}"));
                }
                None => {
                    // stdout closed, reap the exit status
                    return match child.wait().await {
                        Ok(status) => InvocationOutcome::Exited {
                            code: status.code(),
                        },
                        Err(e) => failed(format!("failed to reap child: {e}")),
                    };
                }
            },
        }
    }
}

/// Escalating termination: polite signal, bounded grace, then hard kill
async fn terminate(child: &mut Child, grace: Duration, session_id: &str) -> InvocationOutcome {
    signal_graceful(child, session_id);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            log::debug!("[{session_id}] child exited after graceful signal: {status}");
        }
        Ok(Err(e)) => {
            log::warn!("[{session_id}] failed to reap child after signal: {e}");
        }
        Err(_) => {
            log::warn!("[{session_id}] child survived the {grace:?} grace period, killing");
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }

    InvocationOutcome::Cancelled
}

/// Send the polite termination signal where the platform has one
fn signal_graceful(child: &Child, session_id: &str) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            log::debug!("[{session_id}] SIGTERM delivery failed: {e}");
        }
    }
    #[cfg(not(unix))]
    let _ = (child, session_id);
}

/// Drain stderr into a bounded tail
async fn collect_stderr_tail(mut stderr: ChildStderr) -> String {
    use tokio::io::AsyncReadExt;

    let mut tail: Vec<u8> = Vec::new();
    let mut buffer = vec![0u8; 4096];

    loop {
        match stderr.read(&mut buffer).await {
            Ok(0) | Err(_) => break, // EOF
            Ok(n) => {
                tail.extend_from_slice(&buffer[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let cut = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..cut);
                }
            }
        }
    }

    String::from_utf8_lossy(&tail).trim().to_string()
}

fn failed(reason: impl Into<String>) -> InvocationOutcome {
    InvocationOutcome::Failed {
        reason: reason.into(),
    }
}
