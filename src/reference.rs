//! File references embedded in prompts
//!
//! A reference is a `@path` tag with an optional `#Lstart-end` fragment
//! naming a 1-based inclusive line range. References are resolved against
//! the session working directory when a prompt is sent, producing either a
//! citation (the referenced content) or a recorded failure. Resolution
//! failures never abort a send.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Error type for reference parsing and resolution
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// Reference tag could not be parsed
    #[error("Malformed reference {0:?}")]
    Malformed(String),

    /// Referenced file does not exist
    #[error("File not found: {0}")]
    NotFound(String),

    /// Requested line range falls outside the file
    #[error("Lines {start}-{end} out of range: {path} has {len} lines")]
    OutOfRange {
        /// The referenced path as written
        path: String,
        /// First requested line (1-based)
        start: usize,
        /// Last requested line (inclusive)
        end: usize,
        /// Number of lines the file actually has
        len: usize,
    },

    /// Referenced file exists but could not be read
    #[error("Failed to read {path}: {reason}")]
    Unreadable {
        /// The referenced path as written
        path: String,
        /// Underlying read failure
        reason: String,
    },
}

// ============================================================================
// File references
// ============================================================================

/// A 1-based inclusive line range within a referenced file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    /// First line, 1-based
    pub start: usize,
    /// Last line, inclusive
    pub end: usize,
}

/// A `@path` or `@path#Lstart-end` reference as written in a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Referenced path, relative paths resolve against the session cwd
    pub path: String,
    /// Optional line range restriction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<LineRange>,
}

/// A successfully resolved reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// The reference as written
    pub reference: FileReference,
    /// Referenced file content (sliced to the line range when present)
    pub content: String,
}

/// A reference that failed to resolve at send time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFailure {
    /// The reference as written
    pub reference: FileReference,
    /// Human readable failure reason
    pub reason: String,
}

impl ReferenceFailure {
    /// Record a resolution failure for a reference
    #[must_use]
    pub fn new(reference: FileReference, error: &ReferenceError) -> Self {
        Self {
            reference,
            reason: error.to_string(),
        }
    }
}

impl FileReference {
    /// Create a whole-file reference
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lines: None,
        }
    }

    /// Create a reference restricted to a line range
    pub fn with_lines(path: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            path: path.into(),
            lines: Some(LineRange { start, end }),
        }
    }

    /// Extract all references from free prompt text
    ///
    /// Scans whitespace-delimited tokens for a leading `@`, trimming
    /// trailing sentence punctuation. Tokens that do not parse are skipped.
    #[must_use]
    pub fn extract(text: &str) -> Vec<Self> {
        text.split_whitespace()
            .filter_map(|token| {
                let tag = token.strip_prefix('@')?;
                let tag = tag.trim_end_matches(['.', ',', ';', ':', '!', '?']);
                if tag.is_empty() {
                    return None;
                }
                tag.parse().ok()
            })
            .collect()
    }

    /// Resolve this reference against a working directory
    ///
    /// Relative paths join `cwd`. For ranged references the file content is
    /// sliced to the requested lines.
    ///
    /// # Errors
    /// Returns `NotFound` if the file does not exist, `Malformed` if the
    /// range violates `1 <= start <= end`, `OutOfRange` if the range
    /// exceeds the file, or `Unreadable` for any other read failure.
    pub fn resolve(&self, cwd: &Path) -> std::result::Result<Citation, ReferenceError> {
        let full = if Path::new(&self.path).is_absolute() {
            Path::new(&self.path).to_path_buf()
        } else {
            cwd.join(&self.path)
        };

        let content = std::fs::read_to_string(&full).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReferenceError::NotFound(self.path.clone())
            } else {
                ReferenceError::Unreadable {
                    path: self.path.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let content = match self.lines {
            Some(range) => {
                // Ranges built programmatically bypass parse_range; reject
                // anything outside the 1 <= start <= end grammar here too
                if range.start == 0 || range.start > range.end {
                    return Err(ReferenceError::Malformed(self.to_string()));
                }
                let lines: Vec<&str> = content.lines().collect();
                if range.end > lines.len() {
                    return Err(ReferenceError::OutOfRange {
                        path: self.path.clone(),
                        start: range.start,
                        end: range.end,
                        len: lines.len(),
                    });
                }
                lines[range.start - 1..range.end].join("\n")
            }
            None => content.strip_suffix('\n').unwrap_or(&content).to_string(),
        };

        Ok(Citation {
            reference: self.clone(),
            content,
        })
    }
}

/// Resolve a batch of references, partitioning successes from failures
///
/// Order within each partition follows the input order.
#[must_use]
pub fn resolve_all(
    references: &[FileReference],
    cwd: &Path,
) -> (Vec<Citation>, Vec<ReferenceFailure>) {
    let mut citations = Vec::new();
    let mut failures = Vec::new();
    for reference in references {
        match reference.resolve(cwd) {
            Ok(citation) => citations.push(citation),
            Err(e) => {
                log::debug!("reference {reference} failed to resolve: {e}");
                failures.push(ReferenceFailure::new(reference.clone(), &e));
            }
        }
    }
    (citations, failures)
}

impl FromStr for FileReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let tag = s.strip_prefix('@').unwrap_or(s);
        if tag.is_empty() {
            return Err(ReferenceError::Malformed(s.to_string()));
        }

        // Only a trailing fragment shaped like a line range is treated as
        // one; any other '#' stays part of the path.
        if let Some((path, fragment)) = tag.rsplit_once('#')
            && looks_like_range(fragment)
        {
            if path.is_empty() {
                return Err(ReferenceError::Malformed(s.to_string()));
            }
            let range =
                parse_range(fragment).ok_or_else(|| ReferenceError::Malformed(s.to_string()))?;
            return Ok(Self {
                path: path.to_string(),
                lines: Some(range),
            });
        }

        Ok(Self {
            path: tag.to_string(),
            lines: None,
        })
    }
}

impl fmt::Display for FileReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.path)?;
        if let Some(range) = self.lines {
            if range.start == range.end {
                write!(f, "#L{}", range.start)?;
            } else {
                write!(f, "#L{}-{}", range.start, range.end)?;
            }
        }
        Ok(())
    }
}

/// Whether a fragment is syntactically a line range (`L<digits>` or
/// `L<digits>-<digits>`), as opposed to part of a file name
fn looks_like_range(fragment: &str) -> bool {
    match fragment.strip_prefix('L') {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c == '-'),
        None => false,
    }
}

/// Parse a syntactic range fragment, enforcing `1 <= start <= end`
fn parse_range(fragment: &str) -> Option<LineRange> {
    let rest = fragment.strip_prefix('L')?;
    let (start, end) = match rest.split_once('-') {
        Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
        None => {
            let n = rest.parse().ok()?;
            (n, n)
        }
    };
    if start == 0 || start > end {
        return None;
    }
    Some(LineRange { start, end })
}
