//! Session diary entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The session accomplished its goal.
    Success,
    /// The session failed.
    Failure,
    /// Partial success.
    #[default]
    Mixed,
}

impl SessionStatus {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Mixed => "mixed",
        }
    }
}

/// A structured summary of one coding session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryEntry {
    /// Unique identifier.
    pub id: String,
    /// Path of the session transcript this diary summarizes.
    #[serde(alias = "session_path")]
    pub session_path: String,
    /// When the session happened.
    pub timestamp: DateTime<Utc>,
    /// Which agent ran the session.
    #[serde(default)]
    pub agent: String,
    /// Workspace the session ran in.
    #[serde(default)]
    pub workspace: String,
    /// Session outcome.
    #[serde(default)]
    pub status: SessionStatus,
    /// What was accomplished.
    #[serde(default)]
    pub accomplishments: Vec<String>,
    /// Decisions taken.
    #[serde(default)]
    pub decisions: Vec<String>,
    /// Challenges hit.
    #[serde(default)]
    pub challenges: Vec<String>,
    /// User preferences observed.
    #[serde(default)]
    pub preferences: Vec<String>,
    /// Durable learnings.
    #[serde(default, alias = "key_learnings")]
    pub key_learnings: Vec<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Phrases to search history by.
    #[serde(default, alias = "search_anchors")]
    pub search_anchors: Vec<String>,
    /// Related session paths.
    #[serde(default, alias = "related_sessions")]
    pub related_sessions: Vec<String>,
}

impl DiaryEntry {
    /// Creates a minimal diary entry for a session.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        session_path: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            session_path: session_path.into(),
            timestamp,
            agent: String::new(),
            workspace: String::new(),
            status: SessionStatus::Mixed,
            accomplishments: Vec::new(),
            decisions: Vec::new(),
            challenges: Vec::new(),
            preferences: Vec::new(),
            key_learnings: Vec::new(),
            tags: Vec::new(),
            search_anchors: Vec::new(),
            related_sessions: Vec::new(),
        }
    }
}
