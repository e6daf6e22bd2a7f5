//! Session outcome records and the processed-session log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a session turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Goal reached.
    Success,
    /// Goal not reached.
    Failure,
    /// Some of both.
    Mixed,
    /// Stopped partway.
    Partial,
}

impl Outcome {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Mixed => "mixed",
            Self::Partial => "partial",
        }
    }

    /// Parses an outcome string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Validation`] for unknown values.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "mixed" => Ok(Self::Mixed),
            "partial" => Ok(Self::Partial),
            other => Err(crate::Error::Validation(format!(
                "unknown outcome '{other}' (expected success|failure|mixed|partial)"
            ))),
        }
    }
}

/// A recorded session outcome, appended to `outcomes.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    /// Session identifier.
    #[serde(alias = "session_id")]
    pub session_id: String,
    /// How the session turned out.
    pub outcome: Outcome,
    /// Bullet ids consulted during the session.
    #[serde(default, alias = "rules_used")]
    pub rules_used: Vec<String>,
    /// Wall-clock duration.
    #[serde(default, alias = "duration_sec", skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
    /// Errors hit during the session.
    #[serde(default, alias = "error_count", skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    /// Whether any step needed a retry.
    #[serde(default, alias = "had_retries", skip_serializing_if = "Option::is_none")]
    pub had_retries: Option<bool>,
    /// Free-form sentiment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// When the record was written.
    #[serde(alias = "recorded_at")]
    pub recorded_at: DateTime<Utc>,
    /// Transcript path.
    pub path: String,
}

/// One line of `reflections/processed.log`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedEntry {
    /// Transcript that was reflected on.
    #[serde(alias = "session_path")]
    pub session_path: String,
    /// When reflection finished.
    #[serde(alias = "processed_at")]
    pub processed_at: DateTime<Utc>,
    /// Diary produced for the session.
    #[serde(alias = "diary_id")]
    pub diary_id: String,
    /// How many deltas the reflection produced.
    #[serde(default, alias = "deltas_generated")]
    pub deltas_generated: u32,
}
