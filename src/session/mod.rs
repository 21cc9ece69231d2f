//! Session management for Gemini CLI invocations
//!
//! Provides `SessionManager` for opening, driving, and closing concurrent
//! Gemini sessions with per-session transcripts, replayable output
//! streams, and escalating cancellation.
//!
//! # Module Structure
//!
//! - `manager` - Core `SessionManager` with the public API
//! - `state` - Session identifiers and state structures
//! - `stream` - Invocation output log and stream handles
//! - `invocation` - Child process driving for one send

mod invocation;
mod manager;
mod state;
mod stream;

pub use manager::SessionManager;
pub use state::{SessionId, SessionInfo, SessionState};
pub use stream::OutputStream;
