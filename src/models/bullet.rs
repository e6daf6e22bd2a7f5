//! Playbook bullet types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of feedback recorded against a bullet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackType {
    /// The rule helped in a session.
    Helpful,
    /// The rule hurt or misled in a session.
    Harmful,
}

impl FeedbackType {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Helpful => "helpful",
            Self::Harmful => "harmful",
        }
    }
}

/// A single helpful/harmful observation tied to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEvent {
    /// Whether the rule helped or hurt.
    #[serde(rename = "type")]
    pub feedback_type: FeedbackType,
    /// When the feedback was observed.
    pub timestamp: DateTime<Utc>,
    /// Session the feedback came from, when known.
    #[serde(default, alias = "session_path", skip_serializing_if = "Option::is_none")]
    pub session_path: Option<String>,
}

impl FeedbackEvent {
    /// Creates a feedback event at the given time.
    #[must_use]
    pub fn new(
        feedback_type: FeedbackType,
        timestamp: DateTime<Utc>,
        session_path: Option<String>,
    ) -> Self {
        Self {
            feedback_type,
            timestamp,
            session_path,
        }
    }
}

/// Taxonomy kind of a bullet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulletKind {
    /// A rule about how to work.
    #[default]
    WorkflowRule,
    /// A rule about a technology stack.
    StackPattern,
    /// An explicit thing to avoid.
    AntiPattern,
    /// A user preference.
    Preference,
    /// Anything else.
    #[serde(other)]
    Other,
}

impl BulletKind {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowRule => "workflow_rule",
            Self::StackPattern => "stack_pattern",
            Self::AntiPattern => "anti_pattern",
            Self::Preference => "preference",
            Self::Other => "other",
        }
    }

    /// Parses a kind string, defaulting to `workflow_rule`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "stack_pattern" => Self::StackPattern,
            "anti_pattern" => Self::AntiPattern,
            "preference" => Self::Preference,
            "other" => Self::Other,
            _ => Self::WorkflowRule,
        }
    }
}

/// Scope tier a bullet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulletScope {
    /// Applies everywhere.
    #[default]
    Global,
    /// Applies to one workspace only.
    Workspace,
}

impl BulletScope {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Workspace => "workspace",
        }
    }
}

/// Lifecycle state of a bullet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulletState {
    /// Proposed but not yet confirmed.
    #[default]
    Draft,
    /// In active use.
    Active,
    /// Tombstoned.
    Retired,
}

impl BulletState {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }
}

/// Coarse confidence tier of a bullet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Maturity {
    /// Newly extracted, unproven.
    #[default]
    Candidate,
    /// Repeatedly helpful.
    Established,
    /// Strongly and durably helpful.
    Proven,
    /// Retired for harm or replacement.
    Deprecated,
}

impl Maturity {
    /// Returns the wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Established => "established",
            Self::Proven => "proven",
            Self::Deprecated => "deprecated",
        }
    }

    /// Glyph used in compact playbook formatting.
    #[must_use]
    pub const fn glyph(self) -> &'static str {
        match self {
            Self::Candidate => "·",
            Self::Established => "+",
            Self::Proven => "*",
            Self::Deprecated => "x",
        }
    }
}

impl fmt::Display for Maturity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generates a bullet id following the `b-<timestamp>-<random>` convention.
#[must_use]
pub fn generate_bullet_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("b-{}-{}", now.timestamp_millis(), &suffix[..6])
}

/// An atomic rule in the playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookBullet {
    /// Opaque identifier (`b-<timestamp>-<random>`).
    pub id: String,
    /// Imperative text of the rule.
    pub content: String,
    /// Free-form taxonomy tag (e.g. `testing`, `io`).
    #[serde(default)]
    pub category: String,
    /// Taxonomy kind.
    #[serde(default)]
    pub kind: BulletKind,
    /// Whether the rule is phrased as an anti-pattern.
    #[serde(default, alias = "is_negative")]
    pub is_negative: bool,
    /// Scope tier.
    #[serde(default)]
    pub scope: BulletScope,
    /// Workspace qualifier for workspace-scoped bullets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub state: BulletState,
    /// Confidence tier.
    #[serde(default)]
    pub maturity: Maturity,
    /// Count of helpful feedback events.
    #[serde(default, alias = "helpful_count")]
    pub helpful_count: u32,
    /// Count of harmful feedback events.
    #[serde(default, alias = "harmful_count")]
    pub harmful_count: u32,
    /// Ordered feedback history.
    #[serde(default, alias = "feedback_events")]
    pub feedback_events: Vec<FeedbackEvent>,
    /// Per-bullet decay half-life in days.
    #[serde(default = "default_half_life", alias = "confidence_decay_half_life_days")]
    pub confidence_decay_half_life_days: f64,
    /// Creation timestamp.
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
    /// Deprecation timestamp, when tombstoned.
    #[serde(default, alias = "deprecated_at", skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
    /// Sessions the rule was extracted from.
    #[serde(default, alias = "source_sessions")]
    pub source_sessions: Vec<String>,
    /// Agents the rule was extracted by.
    #[serde(default, alias = "source_agents")]
    pub source_agents: Vec<String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Exempt from pruning.
    #[serde(default)]
    pub pinned: bool,
    /// Tombstone flag.
    #[serde(default)]
    pub deprecated: bool,
    /// Why the bullet was retired.
    #[serde(default, alias = "deprecation_reason", skip_serializing_if = "Option::is_none")]
    pub deprecation_reason: Option<String>,
    /// Id of the bullet that supersedes this one.
    #[serde(default, alias = "replaced_by", skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<String>,
}

fn default_half_life() -> f64 {
    90.0
}

impl PlaybookBullet {
    /// Creates a new candidate bullet with initialized counters.
    #[must_use]
    pub fn new(
        content: impl Into<String>,
        category: impl Into<String>,
        scope: BulletScope,
        kind: BulletKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: generate_bullet_id(now),
            content: content.into(),
            category: category.into(),
            kind,
            is_negative: false,
            scope,
            workspace: None,
            state: BulletState::Draft,
            maturity: Maturity::Candidate,
            helpful_count: 0,
            harmful_count: 0,
            feedback_events: Vec::new(),
            confidence_decay_half_life_days: default_half_life(),
            created_at: now,
            updated_at: now,
            deprecated_at: None,
            source_sessions: Vec::new(),
            source_agents: Vec::new(),
            tags: Vec::new(),
            pinned: false,
            deprecated: false,
            deprecation_reason: None,
            replaced_by: None,
        }
    }

    /// Whether the bullet is live (not retired, not tombstoned).
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.deprecated && self.state != BulletState::Retired
    }

    /// Appends a feedback event and keeps the counters in sync.
    pub fn record_feedback(
        &mut self,
        feedback_type: FeedbackType,
        session_path: Option<String>,
        now: DateTime<Utc>,
    ) {
        match feedback_type {
            FeedbackType::Helpful => self.helpful_count += 1,
            FeedbackType::Harmful => self.harmful_count += 1,
        }
        self.feedback_events
            .push(FeedbackEvent::new(feedback_type, now, session_path));
        self.updated_at = now;
    }

    /// Marks the bullet as deprecated.
    pub fn deprecate(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.deprecated = true;
        self.state = BulletState::Retired;
        self.maturity = Maturity::Deprecated;
        self.deprecation_reason = Some(reason.into());
        self.deprecated_at = Some(now);
        self.updated_at = now;
    }

    /// Timestamp of the most recent feedback event, if any.
    #[must_use]
    pub fn last_feedback_at(&self) -> Option<DateTime<Utc>> {
        self.feedback_events.iter().map(|e| e.timestamp).max()
    }
}
