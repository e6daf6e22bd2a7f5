//! # cass-memory
//!
//! A local, agent-neutral learning memory for AI coding assistants.
//!
//! cass-memory accumulates a curated playbook of durable rules and per-session
//! diary summaries, then surfaces the most relevant rules and historical
//! snippets when an agent starts a new task. Raw session transcripts flow
//! through reflection, validation, and curation into a stable, self-correcting
//! rule base.
//!
//! ## Features
//!
//! - Time-decayed helpful/harmful scoring with a maturity state machine
//! - Bounded iterative reflection over session diaries
//! - Evidence gating of candidate rules against recorded history
//! - Curation with conflict resolution and anti-pattern inversion
//! - Global + per-repository playbook overlay with lock-guarded atomic writes
//! - Graceful degradation when the `cass` history indexer is unavailable
//!
//! ## Example
//!
//! ```rust,ignore
//! use cass_memory::config::MemoryConfig;
//! use cass_memory::context::{assemble_context, ContextOptions};
//!
//! let config = MemoryConfig::load()?;
//! let context = assemble_context("fix flaky integration tests", &ContextOptions::default(), &config)?;
//! for bullet in &context.relevant_bullets {
//!     println!("{}", bullet.content);
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use std::error::Error as StdError;
use std::fmt;

pub mod config;
pub mod context;
pub mod curation;
pub mod guard;
pub mod history;
pub mod keywords;
pub mod models;
pub mod observability;
pub mod oracle;
pub mod output;
pub mod reflection;
pub mod sanitize;
pub mod scoring;
pub mod storage;
pub mod validation;

// Re-exports for convenience
pub use config::MemoryConfig;
pub use models::{
    DiaryEntry, FeedbackEvent, Playbook, PlaybookBullet, PlaybookDelta, TraumaEntry,
};
pub use oracle::Oracle;

/// Error type for cass-memory operations.
#[derive(Debug)]
pub enum Error {
    /// Filesystem, lock, or tempfile failure.
    Io {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
    /// YAML/JSON/JSONL parsing failure.
    Parse {
        /// The file or stream being parsed.
        source: String,
        /// The underlying cause.
        cause: String,
    },
    /// Invariant violation detected after a successful parse.
    Schema(String),
    /// The history binary is missing or not executable.
    ToolUnavailable(String),
    /// The history binary failed: non-zero exit, timeout, or buffer overflow.
    ToolFailure {
        /// The invoked operation.
        operation: String,
        /// Exit code surfaced by the adapter.
        exit_code: i32,
        /// The underlying cause.
        cause: String,
    },
    /// The extraction oracle failed or returned an invalid shape.
    OracleFailure(String),
    /// Invalid user input.
    Validation(String),
    /// Configuration merge or validation failure.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { operation, cause } => {
                write!(f, "io error during '{operation}': {cause}")
            },
            Self::Parse { source, cause } => {
                write!(f, "parse error in {source}: {cause}")
            },
            Self::Schema(msg) => write!(f, "schema violation: {msg}"),
            Self::ToolUnavailable(msg) => write!(f, "history tool unavailable: {msg}"),
            Self::ToolFailure {
                operation,
                exit_code,
                cause,
            } => {
                write!(f, "history tool '{operation}' failed (exit {exit_code}): {cause}")
            },
            Self::OracleFailure(msg) => write!(f, "oracle failure: {msg}"),
            Self::Validation(msg) => write!(f, "invalid input: {msg}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl StdError for Error {}

impl Error {
    /// Builds an [`Error::Io`] from an operation name and cause.
    pub fn io(operation: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Io {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds an [`Error::Parse`] from a source name and cause.
    pub fn parse(source: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Parse {
            source: source.into(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for cass-memory operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::io("write_playbook", "permission denied");
        let display = format!("{err}");
        assert!(display.contains("write_playbook"));
        assert!(display.contains("permission denied"));

        let err = Error::ToolFailure {
            operation: "search".to_string(),
            exit_code: 10,
            cause: "timed out".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("exit 10"));
        assert!(display.contains("timed out"));
    }

    #[test]
    fn test_parse_error_names_source() {
        let err = Error::parse("playbook.yaml", "bad indent");
        assert!(format!("{err}").contains("playbook.yaml"));
    }
}
