//! Launching the external Gemini process
//!
//! Binary resolution, environment hygiene, and command construction for
//! one invocation. The session layer owns prompt delivery and output
//! consumption; this module only gets the child running.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::{
    API_KEY_ENV_VAR, DANGEROUS_ENV_VARS, DEFAULT_GEMINI_COMMAND, GeminiAgentOptions,
};
use crate::error::{GeminiError, Result};

/// Resolve the configured command to a concrete binary path
///
/// A configured bare name (and the default `gemini`) is looked up on PATH
/// first, then in common npm install locations. A configured explicit path
/// must exist and be a file.
///
/// # Errors
/// Returns `GeminiError::BinaryNotFound` when nothing resolves.
pub fn resolve_command(options: &GeminiAgentOptions) -> Result<PathBuf> {
    match &options.gemini_command {
        Some(command) => {
            // A single-component command is a name, not a location.
            if command.components().count() == 1 {
                find_gemini(&command.to_string_lossy())
            } else if command.exists() && command.is_file() {
                Ok(command.clone())
            } else {
                Err(GeminiError::binary_not_found_at(
                    command.display().to_string(),
                ))
            }
        }
        None => find_gemini(DEFAULT_GEMINI_COMMAND),
    }
}

/// Find the Gemini CLI binary by name
///
/// # Errors
/// Returns error if the binary cannot be found in PATH or common locations
fn find_gemini(name: &str) -> Result<PathBuf> {
    // Try using 'which' crate first
    if let Ok(path) = which::which(name) {
        return Ok(path);
    }

    // Manual search in common locations
    let home = env::var("HOME").unwrap_or_else(|_| String::from("/root"));
    let locations = vec![
        PathBuf::from(home.clone()).join(".npm-global/bin").join(name),
        PathBuf::from("/usr/local/bin").join(name),
        PathBuf::from(home.clone()).join(".local/bin").join(name),
        PathBuf::from(home.clone()).join("node_modules/.bin").join(name),
        PathBuf::from(home).join(".yarn/bin").join(name),
    ];

    for path in locations {
        if path.exists() && path.is_file() {
            return Ok(path);
        }
    }

    Err(GeminiError::binary_not_found())
}

/// Spawn one Gemini invocation in `cwd` with piped stdio
///
/// The environment is inherited with caller-provided variables overlaid,
/// minus the dangerous list, plus the API key when configured. The child
/// is tied to its handle with `kill_on_drop` so an aborted invocation
/// cannot leak a process.
///
/// # Errors
/// Returns `BinaryNotFound` if the binary refuses to execute, or
/// `GeminiError::Io` for any other spawn failure.
pub fn spawn_invocation(
    binary: &Path,
    cwd: &Path,
    options: &GeminiAgentOptions,
) -> Result<Child> {
    let mut cmd = Command::new(binary);

    // Set up environment - filter dangerous variables
    let mut process_env = env::vars().collect::<HashMap<_, _>>();

    // Only add user-provided env vars that are not in the dangerous list
    for (key, value) in &options.env {
        if !DANGEROUS_ENV_VARS.contains(&key.as_str()) {
            process_env.insert(key.clone(), value.clone());
        }
    }

    if let Some(api_key) = &options.api_key {
        process_env.insert(API_KEY_ENV_VAR.to_string(), api_key.clone());
    }

    process_env.insert("PWD".to_string(), cwd.to_string_lossy().to_string());
    cmd.current_dir(cwd);
    cmd.envs(process_env);

    // Set up stdio
    // IMPORTANT: We pipe stderr instead of inheriting to prevent the child
    // process from manipulating the parent terminal state.
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    log::debug!("spawning {} in {}", binary.display(), cwd.display());

    cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            GeminiError::BinaryNotFound(format!("{} could not be executed: {e}", binary.display()))
        }
        _ => GeminiError::Io(e),
    })
}
