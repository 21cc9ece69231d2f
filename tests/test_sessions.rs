//! Integration tests for `SessionManager`
//!
//! Drives real child processes through fixture shell scripts standing in
//! for the Gemini CLI.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use gemini_agent::{
    FileReference, GeminiAgentOptions, GeminiError, InvocationOutcome, Role, SessionId,
    SessionManager, SessionState, TranscriptEntry,
};
use tempfile::TempDir;
use tokio::time::timeout;

/// Upper bound on any single await in these tests
const WAIT: Duration = Duration::from_secs(10);

/// Fixture that reads the prompt, emits one line, then hangs
const SLOW_SCRIPT: &str = "#!/bin/sh\ncat >/dev/null\necho started\nexec sleep 30\n";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write an executable fixture script and return its path
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// Manager launching `command` with a short cancellation grace period
fn manager_for(command: impl Into<PathBuf>) -> SessionManager {
    let options = GeminiAgentOptions::builder()
        .gemini_command(command)
        .cancel_grace(Duration::from_millis(500))
        .build();
    SessionManager::with_options(options)
}

#[tokio::test]
async fn test_stream_yields_chunks_in_order() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "abc.sh",
        "#!/bin/sh\ncat >/dev/null\necho A\necho B\necho C\n",
    );
    let manager = manager_for(script);

    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();
    let mut output = manager.send(&session, "go", &[]).await.unwrap();

    let chunks = timeout(WAIT, output.collect_remaining()).await.unwrap();
    assert_eq!(chunks, ["A", "B", "C"]);
    assert!(matches!(
        output.outcome(),
        Some(InvocationOutcome::Exited { code: Some(0) })
    ));

    let info = manager.session_info(&session).await.unwrap();
    assert_eq!(info.state, SessionState::Idle);
}

#[tokio::test]
async fn test_accumulated_prompt_includes_prior_turns() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let manager = manager_for("/bin/cat");

    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let mut first = manager.send(&session, "hello", &[]).await.unwrap();
    let first_chunks = timeout(WAIT, first.collect_remaining()).await.unwrap();
    assert_eq!(first_chunks, ["user: hello"]);

    // The second invocation receives the whole conversation so far
    let mut second = manager.send(&session, "again", &[]).await.unwrap();
    let text = timeout(WAIT, second.collect_remaining())
        .await
        .unwrap()
        .join("\n");
    assert!(text.contains("user: hello"));
    assert!(text.contains("agent: user: hello"));
    assert!(text.ends_with("user: again"));
}

#[tokio::test]
async fn test_send_while_running_is_busy() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(tmp.path(), "slow.sh", SLOW_SCRIPT);
    let manager = manager_for(script);

    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();
    let mut output = manager.send(&session, "first", &[]).await.unwrap();

    // The first chunk proves the invocation is live
    let first = timeout(WAIT, output.next_chunk()).await.unwrap();
    assert_eq!(first.as_deref(), Some("started"));

    let err = manager.send(&session, "second", &[]).await.unwrap_err();
    assert!(matches!(err, GeminiError::SessionBusy(_)));

    // The rejected send leaves no trace and the original stream still ends
    // normally once cancelled
    manager.cancel(&session).await.unwrap();
    let rest = timeout(WAIT, output.collect_remaining()).await.unwrap();
    assert!(rest.is_empty());
    assert!(matches!(output.outcome(), Some(InvocationOutcome::Cancelled)));

    let transcript = manager.transcript_snapshot(&session).await.unwrap();
    assert_eq!(transcript.len(), 3); // user, agent, exit marker
}

#[tokio::test]
async fn test_cancel_terminates_and_tags_incomplete() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "slow.sh",
        "#!/bin/sh\ncat >/dev/null\necho partial\nexec sleep 30\n",
    );
    let manager = manager_for(script);

    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();
    let mut output = manager.send(&session, "work", &[]).await.unwrap();
    let first = timeout(WAIT, output.next_chunk()).await.unwrap();
    assert_eq!(first.as_deref(), Some("partial"));

    timeout(WAIT, manager.cancel(&session)).await.unwrap().unwrap();

    let info = manager.session_info(&session).await.unwrap();
    assert_eq!(info.state, SessionState::Idle);

    let transcript = manager.transcript_snapshot(&session).await.unwrap();
    let agent = transcript
        .iter()
        .find_map(|entry| match entry {
            TranscriptEntry::Message(record) if record.role == Role::Agent => {
                Some(record.clone())
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(agent.text, "partial");
    assert!(agent.incomplete);

    assert!(matches!(
        transcript.last(),
        Some(TranscriptEntry::ProcessExit {
            outcome: InvocationOutcome::Cancelled,
            ..
        })
    ));

    // The session accepts a new send after cancellation
    let mut retry = manager.send(&session, "more", &[]).await.unwrap();
    let first = timeout(WAIT, retry.next_chunk()).await.unwrap();
    assert_eq!(first.as_deref(), Some("partial"));
    manager.cancel(&session).await.unwrap();
}

#[tokio::test]
async fn test_cancel_on_idle_session_is_a_noop() {
    init_logging();
    let manager = manager_for("/bin/cat");
    let session = manager.open_session(None).await.unwrap();

    manager.cancel(&session).await.unwrap();
    manager.cancel(&session).await.unwrap();

    let info = manager.session_info(&session).await.unwrap();
    assert_eq!(info.state, SessionState::Idle);
    assert_eq!(info.transcript_len, 0);
}

#[tokio::test]
async fn test_unknown_session_is_reported() {
    init_logging();
    let manager = manager_for("/bin/cat");
    let stale = SessionId::from("not-a-session");

    assert!(matches!(
        manager.cancel(&stale).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.send(&stale, "x", &[]).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.stream_output(&stale).await,
        Err(GeminiError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_operations_after_close_fail_not_found() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let manager = manager_for("/bin/cat");
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();
    manager.close_session(&session).await.unwrap();

    assert!(matches!(
        manager.send(&session, "x", &[]).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.cancel(&session).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.stream_output(&session).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.session_info(&session).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.set_working_directory(&session, tmp.path()).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.close_session(&session).await,
        Err(GeminiError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_close_terminates_running_invocation() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(tmp.path(), "slow.sh", SLOW_SCRIPT);
    let manager = manager_for(script);

    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();
    let mut output = manager.send(&session, "go", &[]).await.unwrap();
    let _ = timeout(WAIT, output.next_chunk()).await.unwrap();

    timeout(WAIT, manager.close_session(&session))
        .await
        .unwrap()
        .unwrap();

    // The stream ends once the invocation is torn down
    let rest = timeout(WAIT, output.collect_remaining()).await.unwrap();
    assert!(rest.is_empty());
    assert!(matches!(output.outcome(), Some(InvocationOutcome::Cancelled)));
    assert!(manager.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_invalid_working_directory_is_rejected() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let manager = manager_for("/bin/cat");

    let missing = tmp.path().join("nope");
    assert!(matches!(
        manager.open_session(Some(missing.clone())).await,
        Err(GeminiError::InvalidDirectory { .. })
    ));

    // A file is not a directory
    let file = tmp.path().join("plain.txt");
    fs::write(&file, "x").unwrap();
    assert!(matches!(
        manager.open_session(Some(file)).await,
        Err(GeminiError::InvalidDirectory { .. })
    ));

    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();
    let err = manager
        .set_working_directory(&session, &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, GeminiError::InvalidDirectory { .. }));

    // The previous directory stays bound after the failed rebind
    let info = manager.session_info(&session).await.unwrap();
    assert_eq!(info.working_directory, tmp.path());
}

#[tokio::test]
async fn test_working_directory_binds_each_invocation() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "pwd.sh",
        "#!/bin/sh\ncat >/dev/null\necho \"$PWD\"\n",
    );

    let dir_a = tmp.path().join("a");
    let dir_b = tmp.path().join("b");
    fs::create_dir(&dir_a).unwrap();
    fs::create_dir(&dir_b).unwrap();

    let manager = manager_for(script);
    let session = manager.open_session(Some(dir_a.clone())).await.unwrap();

    let mut output = manager.send(&session, "where", &[]).await.unwrap();
    let chunks = timeout(WAIT, output.collect_remaining()).await.unwrap();
    assert_eq!(chunks, [dir_a.display().to_string()]);

    manager
        .set_working_directory(&session, &dir_b)
        .await
        .unwrap();
    let mut output = manager.send(&session, "where now", &[]).await.unwrap();
    let chunks = timeout(WAIT, output.collect_remaining()).await.unwrap();
    assert_eq!(chunks, [dir_b.display().to_string()]);
}

#[tokio::test]
async fn test_sessions_run_concurrently_and_independently() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "pwd.sh",
        "#!/bin/sh\ncat >/dev/null\necho \"$PWD\"\n",
    );

    let dir_a = tmp.path().join("a");
    let dir_b = tmp.path().join("b");
    fs::create_dir(&dir_a).unwrap();
    fs::create_dir(&dir_b).unwrap();

    let manager = manager_for(script);
    let session_a = manager.open_session(Some(dir_a.clone())).await.unwrap();
    let session_b = manager.open_session(Some(dir_b.clone())).await.unwrap();

    let mut output_a = manager.send(&session_a, "where", &[]).await.unwrap();
    let mut output_b = manager.send(&session_b, "where", &[]).await.unwrap();

    let (chunks_a, chunks_b) = timeout(WAIT, async {
        tokio::join!(output_a.collect_remaining(), output_b.collect_remaining())
    })
    .await
    .unwrap();

    assert_eq!(chunks_a, [dir_a.display().to_string()]);
    assert_eq!(chunks_b, [dir_b.display().to_string()]);
    assert_eq!(manager.list_sessions().await.len(), 2);
}

#[tokio::test]
async fn test_missing_binary_is_reported_and_record_kept() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let manager = manager_for(tmp.path().join("no-such-binary"));
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let err = manager.send(&session, "hello", &[]).await.unwrap_err();
    assert!(matches!(err, GeminiError::BinaryNotFound(_)));

    // The user record survives the failed launch
    let transcript = manager.transcript_snapshot(&session).await.unwrap();
    assert_eq!(transcript.len(), 1);
    assert!(matches!(
        &transcript[0],
        TranscriptEntry::Message(record) if record.role == Role::User && record.text == "hello"
    ));

    let info = manager.session_info(&session).await.unwrap();
    assert_eq!(info.state, SessionState::Idle);
}

#[tokio::test]
async fn test_nonzero_exit_lands_in_transcript() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "fail.sh",
        "#!/bin/sh\ncat >/dev/null\necho out\necho oops >&2\nexit 3\n",
    );
    let manager = manager_for(script);
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let mut output = manager.send(&session, "try", &[]).await.unwrap();
    let chunks = timeout(WAIT, output.collect_remaining()).await.unwrap();
    assert_eq!(chunks, ["out"]);
    assert!(matches!(
        output.outcome(),
        Some(InvocationOutcome::Exited { code: Some(3) })
    ));

    let transcript = manager.transcript_snapshot(&session).await.unwrap();

    // Output that ran to the child's own exit is not incomplete
    let agent = transcript
        .iter()
        .find_map(|entry| match entry {
            TranscriptEntry::Message(record) if record.role == Role::Agent => {
                Some(record.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(!agent.incomplete);

    let Some(TranscriptEntry::ProcessExit { outcome, stderr, .. }) = transcript.last() else {
        panic!("expected a process exit entry, got {transcript:?}");
    };
    assert_eq!(*outcome, InvocationOutcome::Exited { code: Some(3) });
    assert!(stderr.as_deref().unwrap().contains("oops"));
}

#[tokio::test]
async fn test_stream_output_replays_from_start() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "abc.sh",
        "#!/bin/sh\ncat >/dev/null\necho A\necho B\necho C\n",
    );
    let manager = manager_for(script);
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    // Before any invocation: empty and already finished
    let mut idle_stream = manager.stream_output(&session).await.unwrap();
    assert!(idle_stream.is_finished());
    assert!(idle_stream.outcome().is_none());
    assert!(timeout(WAIT, idle_stream.next_chunk()).await.unwrap().is_none());

    let mut live = manager.send(&session, "go", &[]).await.unwrap();
    let live_chunks = timeout(WAIT, live.collect_remaining()).await.unwrap();

    // A later observer replays the same chunks in the same order
    let mut replay = manager.stream_output(&session).await.unwrap();
    let replay_chunks = timeout(WAIT, replay.collect_remaining()).await.unwrap();
    assert_eq!(live_chunks, replay_chunks);
    assert_eq!(replay_chunks, ["A", "B", "C"]);
    assert_eq!(replay.outcome(), live.outcome());
}

#[tokio::test]
async fn test_output_consumed_as_futures_stream() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "abc.sh",
        "#!/bin/sh\ncat >/dev/null\necho A\necho B\necho C\n",
    );
    let manager = manager_for(script);
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let output = manager.send(&session, "go", &[]).await.unwrap();
    let chunks: Vec<String> = timeout(WAIT, output.into_stream().collect()).await.unwrap();
    assert_eq!(chunks, ["A", "B", "C"]);
}

#[tokio::test]
async fn test_concurrent_streams_observe_identical_output() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(tmp.path(), "slow.sh", SLOW_SCRIPT);
    let manager = manager_for(script);
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let mut sender_view = manager.send(&session, "go", &[]).await.unwrap();
    let mut observer_view = manager.stream_output(&session).await.unwrap();

    let a = timeout(WAIT, sender_view.next_chunk()).await.unwrap();
    let b = timeout(WAIT, observer_view.next_chunk()).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.as_deref(), Some("started"));

    manager.cancel(&session).await.unwrap();
    assert!(timeout(WAIT, sender_view.next_chunk()).await.unwrap().is_none());
    assert!(timeout(WAIT, observer_view.next_chunk()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unresolved_reference_is_annotated_not_fatal() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let manager = manager_for("/bin/cat");
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let references = vec!["missing.txt".parse::<FileReference>().unwrap()];
    let mut output = manager
        .send(&session, "look at @missing.txt", &references)
        .await
        .unwrap();
    let text = timeout(WAIT, output.collect_remaining())
        .await
        .unwrap()
        .join("\n");

    assert!(text.contains("user: look at @missing.txt"));
    assert!(text.contains("[unresolved @missing.txt: File not found: missing.txt]"));

    let transcript = manager.transcript_snapshot(&session).await.unwrap();
    let Some(TranscriptEntry::Message(user)) = transcript.first() else {
        panic!("expected a user record, got {transcript:?}");
    };
    assert_eq!(user.failures.len(), 1);
    assert!(user.citations.is_empty());
}

#[tokio::test]
async fn test_resolved_reference_content_reaches_the_prompt() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("notes.txt"), "alpha\nbeta\ngamma\n").unwrap();
    let manager = manager_for("/bin/cat");
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let references = vec![FileReference::with_lines("notes.txt", 2, 3)];
    let mut output = manager
        .send(&session, "see @notes.txt#L2-3", &references)
        .await
        .unwrap();
    let text = timeout(WAIT, output.collect_remaining())
        .await
        .unwrap()
        .join("\n");

    assert!(text.contains("@notes.txt#L2-3:"));
    assert!(text.contains("beta\ngamma"));
}

#[tokio::test]
async fn test_environment_overlay_filters_dangerous_variables() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "env.sh",
        "#!/bin/sh\ncat >/dev/null\necho \"ld=$LD_PRELOAD\"\necho \"extra=$EXTRA_FLAG\"\necho \"key=$GOOGLE_API_KEY\"\n",
    );
    let options = GeminiAgentOptions::builder()
        .gemini_command(&script)
        .api_key("test-key-123")
        .add_env("EXTRA_FLAG", "on")
        .add_env("LD_PRELOAD", "/tmp/evil.so")
        .build();
    let manager = SessionManager::with_options(options);
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let mut output = manager.send(&session, "env", &[]).await.unwrap();
    let chunks = timeout(WAIT, output.collect_remaining()).await.unwrap();
    assert!(chunks.contains(&"ld=".to_string()));
    assert!(chunks.contains(&"extra=on".to_string()));
    assert!(chunks.contains(&"key=test-key-123".to_string()));
}

#[tokio::test]
async fn test_oversized_output_line_fails_the_invocation() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "long.sh",
        "#!/bin/sh\ncat >/dev/null\necho aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n",
    );
    let options = GeminiAgentOptions::builder()
        .gemini_command(&script)
        .max_line_len(8)
        .build();
    let manager = SessionManager::with_options(options);
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let mut output = manager.send(&session, "go", &[]).await.unwrap();
    let chunks = timeout(WAIT, output.collect_remaining()).await.unwrap();
    assert!(chunks.is_empty());
    assert!(matches!(
        output.outcome(),
        Some(InvocationOutcome::Failed { .. })
    ));

    let transcript = manager.transcript_snapshot(&session).await.unwrap();
    assert!(matches!(
        transcript.last(),
        Some(TranscriptEntry::ProcessExit {
            outcome: InvocationOutcome::Failed { .. },
            ..
        })
    ));
}

#[tokio::test]
async fn test_kill_escalation_when_graceful_signal_is_ignored() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(
        tmp.path(),
        "stubborn.sh",
        "#!/bin/sh\ntrap '' TERM\ncat >/dev/null\necho tough\nsleep 5\n",
    );
    let manager = manager_for(script);
    let session = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();

    let mut output = manager.send(&session, "go", &[]).await.unwrap();
    let first = timeout(WAIT, output.next_chunk()).await.unwrap();
    assert_eq!(first.as_deref(), Some("tough"));

    timeout(WAIT, manager.cancel(&session)).await.unwrap().unwrap();
    assert!(matches!(output.outcome(), Some(InvocationOutcome::Cancelled)));
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let script = write_script(tmp.path(), "slow.sh", SLOW_SCRIPT);
    let manager = manager_for(script);

    let idle = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();
    let busy = manager
        .open_session(Some(tmp.path().to_path_buf()))
        .await
        .unwrap();
    let mut output = manager.send(&busy, "go", &[]).await.unwrap();
    let _ = timeout(WAIT, output.next_chunk()).await.unwrap();

    timeout(WAIT, manager.shutdown()).await.unwrap().unwrap();

    assert!(manager.list_sessions().await.is_empty());
    assert!(matches!(
        manager.session_info(&idle).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(
        manager.session_info(&busy).await,
        Err(GeminiError::SessionNotFound(_))
    ));
    assert!(matches!(output.outcome(), Some(InvocationOutcome::Cancelled)));
}
