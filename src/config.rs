//! Configuration for the Gemini session manager
//!
//! This module contains the programmatic options for the session manager,
//! including a builder pattern for easy configuration, plus an optional
//! JSON settings file for the `gemini-agent` binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GeminiError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default external command when `gemini_command` is not configured
pub const DEFAULT_GEMINI_COMMAND: &str = "gemini";

/// Default maximum length of a single output line (1MB)
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

/// Default grace period between the polite termination signal and a hard kill
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Environment variable the configured API key is delivered through
pub const API_KEY_ENV_VAR: &str = "GOOGLE_API_KEY";

/// Dangerous environment variables that should not be passed to subprocess
///
/// These variables can affect how the subprocess loads and executes code,
/// potentially creating security vulnerabilities.
pub const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PATH",
    "NODE_OPTIONS",
    "PYTHONPATH",
    "PERL5LIB",
    "RUBYLIB",
];

// ============================================================================
// Gemini Agent Options
// ============================================================================

/// Main options for the Gemini session manager
#[derive(Debug, Clone)]
pub struct GeminiAgentOptions {
    /// External command to launch; a bare name is resolved on PATH
    pub gemini_command: Option<PathBuf>,
    /// API key exported to the subprocess as `GOOGLE_API_KEY`
    pub api_key: Option<String>,
    /// Extra environment variables for the subprocess
    pub env: HashMap<String, String>,
    /// Grace period between graceful termination and hard kill
    pub cancel_grace: Duration,
    /// Maximum length of a single output line before the invocation fails
    pub max_line_len: usize,
}

impl Default for GeminiAgentOptions {
    fn default() -> Self {
        Self {
            gemini_command: None,
            api_key: None,
            env: HashMap::new(),
            cancel_grace: DEFAULT_CANCEL_GRACE,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

impl GeminiAgentOptions {
    /// Create a new builder for `GeminiAgentOptions`
    #[must_use]
    pub fn builder() -> GeminiAgentOptionsBuilder {
        GeminiAgentOptionsBuilder::default()
    }

    /// Overlay file settings onto these options
    ///
    /// Values already set programmatically win over file values.
    #[must_use]
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if self.gemini_command.is_none()
            && let Some(command) = &settings.gemini_command
        {
            self.gemini_command = Some(PathBuf::from(command));
        }
        if self.api_key.is_none() {
            self.api_key = settings.api_key.clone();
        }
        self
    }
}

// ============================================================================
// Builder for GeminiAgentOptions
// ============================================================================

/// Builder for `GeminiAgentOptions`
#[derive(Debug, Default)]
pub struct GeminiAgentOptionsBuilder {
    options: GeminiAgentOptions,
}

impl GeminiAgentOptionsBuilder {
    /// Set the external command to launch
    #[must_use]
    pub fn gemini_command(mut self, command: impl Into<PathBuf>) -> Self {
        self.options.gemini_command = Some(command.into());
        self
    }

    /// Set the API key exported to the subprocess
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.options.api_key = Some(key.into());
        self
    }

    /// Set extra environment variables for the subprocess
    #[must_use]
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.options.env = env;
        self
    }

    /// Add a single environment variable for the subprocess
    #[must_use]
    pub fn add_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.insert(key.into(), value.into());
        self
    }

    /// Set the grace period between graceful termination and hard kill
    #[must_use]
    pub const fn cancel_grace(mut self, grace: Duration) -> Self {
        self.options.cancel_grace = grace;
        self
    }

    /// Set the maximum length of a single output line
    #[must_use]
    pub const fn max_line_len(mut self, len: usize) -> Self {
        self.options.max_line_len = len;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> GeminiAgentOptions {
        self.options
    }
}

// ============================================================================
// Settings file
// ============================================================================

/// Settings loaded from an optional JSON file
///
/// Unknown keys are ignored so the same file can carry editor-side settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// External command used to launch Gemini
    pub gemini_command: Option<String>,
    /// API key exported to the subprocess
    pub api_key: Option<String>,
    /// Log level filter for the `gemini-agent` binary ("info", "debug", ...)
    pub log_level: Option<String>,
}

impl Settings {
    /// Load settings from a JSON file
    ///
    /// A missing file yields defaults. A file that exists but cannot be
    /// read or parsed is an error.
    ///
    /// # Errors
    /// Returns `GeminiError::Io` if the file cannot be read or is not
    /// valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content).map_err(|e| {
            GeminiError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed settings file {}: {e}", path.display()),
            ))
        })?;
        log::debug!("loaded settings from {}", path.display());
        Ok(settings)
    }
}
