//! # Gemini Agent
//!
//! Session orchestration for the Gemini CLI. This library owns the process
//! plumbing around an externally installed `gemini` binary: it opens
//! sessions bound to a working directory, launches one subprocess per
//! prompt, streams output as it is produced, and serializes concurrent
//! interactions per session.
//!
//! ## Quick Start
//!
//! The [`SessionManager`] is the entry point:
//!
//! ```no_run
//! use gemini_agent::SessionManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SessionManager::new();
//!     let session = manager.open_session(None).await?;
//!
//!     let mut output = manager.send(&session, "Summarize this repository", &[]).await?;
//!     while let Some(chunk) = output.next_chunk().await {
//!         println!("{chunk}");
//!     }
//!
//!     manager.close_session(&session).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Features
//!
//! ### 1. Sessions with One Child at a Time
//!
//! Each session runs at most one invocation; a second send while one is in
//! flight fails with [`GeminiError::SessionBusy`] rather than queueing.
//! Sessions are independent and run concurrently. Output streams replay
//! from the start of the invocation, so a late [`SessionManager::stream_output`]
//! observer sees the same chunks in the same order as the original caller.
//!
//! ### 2. File References
//!
//! Prompts can cite files as `@path` or `@path#Lstart-end`. References are
//! resolved against the session working directory at send time; failures
//! are recorded in the transcript instead of aborting the send:
//!
//! ```no_run
//! # use gemini_agent::{FileReference, SessionManager};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SessionManager::new();
//! let session = manager.open_session(Some("/path/to/project".into())).await?;
//!
//! let references = vec![
//!     "src/main.rs".parse::<FileReference>()?,
//!     FileReference::with_lines("src/lib.rs", 1, 40),
//! ];
//! let mut output = manager
//!     .send(&session, "Explain @src/main.rs and @src/lib.rs#L1-40", &references)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### 3. Configuration
//!
//! ```no_run
//! # use gemini_agent::{GeminiAgentOptions, SessionManager};
//! # use std::time::Duration;
//! let options = GeminiAgentOptions::builder()
//!     .gemini_command("/usr/local/bin/gemini")
//!     .api_key("AIza...")
//!     .cancel_grace(Duration::from_secs(10))
//!     .build();
//!
//! let manager = SessionManager::with_options(options);
//! ```
//!
//! ### 4. Cancellation
//!
//! [`SessionManager::cancel`] escalates from a graceful signal to a hard
//! kill after a bounded grace period, and returns only once the session
//! has settled back to idle. Partial output stays in the transcript,
//! tagged incomplete.
//!
//! ## Architecture
//!
//! - [`session`]: session manager, output streams, identifiers
//! - [`reference`]: `@path` reference parsing and resolution
//! - [`transcript`]: transcript records and prompt rendering
//! - [`launcher`]: binary resolution and process spawning
//! - [`config`]: options, builder, and settings file
//! - [`error`]: error types and handling
//!
//! ## Requirements
//!
//! - Node.js (for the Gemini CLI)
//! - Gemini CLI: `npm install -g @google/gemini-cli`
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, GeminiError>`](Result):
//!
//! ```no_run
//! # use gemini_agent::{GeminiError, SessionManager};
//! # async fn example(manager: &SessionManager) {
//! match manager.send(&"stale-id".into(), "hello", &[]).await {
//!     Ok(_) => { /* ... */ }
//!     Err(GeminiError::SessionNotFound(id)) => {
//!         log::error!("no such session: {id}");
//!     }
//!     Err(e) => {
//!         log::error!("send failed: {e}");
//!     }
//! }
//! # }
//! ```
//!
//! Process exits, including non-zero ones, are not errors: they land in
//! the session transcript as terminal entries with the exit code and a
//! captured stderr tail.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod launcher;
pub mod reference;
pub mod session;
pub mod transcript;

// Re-export commonly used types for external API
pub use config::{GeminiAgentOptions, GeminiAgentOptionsBuilder, Settings};
pub use error::{GeminiError, Result};
pub use reference::{Citation, FileReference, LineRange, ReferenceError, ReferenceFailure};
pub use session::{OutputStream, SessionId, SessionInfo, SessionManager, SessionState};
pub use transcript::{InvocationOutcome, MessageRecord, Role, Transcript, TranscriptEntry};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
