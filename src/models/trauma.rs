//! Trauma entries: commands the safety guard must block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How severe the original catastrophe was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TraumaSeverity {
    /// Serious damage.
    Critical,
    /// Unrecoverable damage.
    Fatal,
}

impl TraumaSeverity {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Fatal => "FATAL",
        }
    }
}

/// Whether a trauma entry is still enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraumaStatus {
    /// Enforced.
    #[default]
    Active,
    /// No longer enforced.
    Healed,
}

/// The event that created a trauma entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Session where the catastrophe happened.
    pub session_path: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// What the user said.
    pub human_message: String,
}

/// A banned-command pattern persisted by the safety guard.
///
/// Trauma records use snake_case on the wire; they are read by an installed
/// cross-agent hook script as well as this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraumaEntry {
    /// Unique identifier.
    pub id: String,
    /// Severity tier.
    pub severity: TraumaSeverity,
    /// Regex matched against candidate commands.
    pub pattern: String,
    /// Scope the ban applies to (`global` or a workspace path).
    #[serde(default)]
    pub scope: String,
    /// Whether the entry is still enforced.
    #[serde(default)]
    pub status: TraumaStatus,
    /// The originating catastrophe.
    pub trigger_event: TriggerEvent,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
}

impl TraumaEntry {
    /// Whether this entry should be enforced.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TraumaStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_wire_format_is_uppercase() {
        let json = serde_json::to_string(&TraumaSeverity::Fatal).unwrap();
        assert_eq!(json, "\"FATAL\"");
        let parsed: TraumaSeverity = serde_json::from_str("\"CRITICAL\"").unwrap();
        assert_eq!(parsed, TraumaSeverity::Critical);
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = TraumaEntry {
            id: "t-1".to_string(),
            severity: TraumaSeverity::Critical,
            pattern: r"rm\s+-rf\s+/".to_string(),
            scope: "global".to_string(),
            status: TraumaStatus::Active,
            trigger_event: TriggerEvent {
                session_path: "/tmp/session.jsonl".to_string(),
                timestamp: Utc::now(),
                human_message: "never do that again".to_string(),
            },
            created_at: Utc::now(),
        };

        let line = serde_json::to_string(&entry).unwrap();
        assert!(line.contains("trigger_event"));
        let back: TraumaEntry = serde_json::from_str(&line).unwrap();
        assert!(back.is_active());
        assert_eq!(back.pattern, entry.pattern);
    }
}
