//! Playbook deltas: proposed mutations produced by reflection.

use super::bullet::{BulletKind, BulletScope};
use serde::{Deserialize, Serialize};

/// Bullet payload carried by an `add` delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftBullet {
    /// Imperative rule text.
    pub content: String,
    /// Taxonomy tag.
    #[serde(default)]
    pub category: String,
    /// Scope tier.
    #[serde(default)]
    pub scope: BulletScope,
    /// Taxonomy kind.
    #[serde(default)]
    pub kind: BulletKind,
    /// Anti-pattern phrasing flag.
    #[serde(default, alias = "is_negative")]
    pub is_negative: bool,
}

/// A proposed mutation to the playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybookDelta {
    /// Add a new rule.
    #[serde(rename_all = "camelCase")]
    Add {
        /// The rule to add.
        bullet: DraftBullet,
        /// Session the rule was extracted from.
        #[serde(default, alias = "source_session", skip_serializing_if = "Option::is_none")]
        source_session: Option<String>,
        /// Why the oracle proposed it.
        #[serde(default)]
        reason: String,
    },
    /// Rewrite an existing rule's content.
    #[serde(rename_all = "camelCase")]
    Replace {
        /// Target bullet id.
        #[serde(alias = "bullet_id")]
        bullet_id: String,
        /// Replacement content.
        #[serde(alias = "new_content")]
        new_content: String,
        /// Why the oracle proposed it.
        #[serde(default)]
        reason: String,
    },
    /// Merge several rules into one.
    #[serde(rename_all = "camelCase")]
    Merge {
        /// Bullets to merge.
        #[serde(alias = "bullet_ids")]
        bullet_ids: Vec<String>,
        /// Content of the merged rule.
        #[serde(alias = "merged_content")]
        merged_content: String,
        /// Category for the merged rule, when supplied by the caller.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        /// Why the oracle proposed it.
        #[serde(default)]
        reason: String,
    },
    /// Retire a rule.
    #[serde(rename_all = "camelCase")]
    Deprecate {
        /// Target bullet id.
        #[serde(alias = "bullet_id")]
        bullet_id: String,
        /// Why the rule is retired.
        #[serde(default)]
        reason: String,
        /// Superseding bullet id, when any.
        #[serde(default, alias = "replaced_by", skip_serializing_if = "Option::is_none")]
        replaced_by: Option<String>,
    },
    /// Record that a rule helped.
    #[serde(rename_all = "camelCase")]
    Helpful {
        /// Target bullet id.
        #[serde(alias = "bullet_id")]
        bullet_id: String,
        /// Session the observation came from.
        #[serde(default, alias = "source_session", skip_serializing_if = "Option::is_none")]
        source_session: Option<String>,
        /// Supporting note.
        #[serde(default)]
        reason: String,
    },
    /// Record that a rule hurt.
    #[serde(rename_all = "camelCase")]
    Harmful {
        /// Target bullet id.
        #[serde(alias = "bullet_id")]
        bullet_id: String,
        /// Session the observation came from.
        #[serde(default, alias = "source_session", skip_serializing_if = "Option::is_none")]
        source_session: Option<String>,
        /// Supporting note.
        #[serde(default)]
        reason: String,
    },
}

impl PlaybookDelta {
    /// Structural, case-folded hash used for deduplication.
    #[must_use]
    pub fn hash_key(&self) -> String {
        match self {
            Self::Add { bullet, .. } => format!("add:{}", bullet.content.to_lowercase()),
            Self::Replace {
                bullet_id,
                new_content,
                ..
            } => format!("replace:{bullet_id}:{new_content}"),
            Self::Merge { bullet_ids, .. } => {
                let mut ids = bullet_ids.clone();
                ids.sort();
                format!("merge:{}", ids.join(","))
            },
            Self::Deprecate { bullet_id, .. } => format!("deprecate:{bullet_id}"),
            Self::Helpful { bullet_id, .. } => format!("helpful:{bullet_id}"),
            Self::Harmful { bullet_id, .. } => format!("harmful:{bullet_id}"),
        }
    }

    /// The delta's source session, when it carries one.
    #[must_use]
    pub fn source_session(&self) -> Option<&str> {
        match self {
            Self::Add { source_session, .. }
            | Self::Helpful { source_session, .. }
            | Self::Harmful { source_session, .. } => source_session.as_deref(),
            _ => None,
        }
    }

    /// Fills in the source session when the variant carries one and it is missing.
    pub fn inject_source_session(&mut self, session: &str) {
        match self {
            Self::Add { source_session, .. }
            | Self::Helpful { source_session, .. }
            | Self::Harmful { source_session, .. } => {
                if source_session.is_none() {
                    *source_session = Some(session.to_string());
                }
            },
            _ => {},
        }
    }

    /// Short tag name for logging.
    #[must_use]
    pub const fn kind_str(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Replace { .. } => "replace",
            Self::Merge { .. } => "merge",
            Self::Deprecate { .. } => "deprecate",
            Self::Helpful { .. } => "helpful",
            Self::Harmful { .. } => "harmful",
        }
    }
}

/// Removes deltas whose hash already occurred, preserving first-seen order.
#[must_use]
pub fn dedup_deltas(deltas: Vec<PlaybookDelta>, seen: &[String]) -> Vec<PlaybookDelta> {
    let mut known: std::collections::HashSet<String> = seen.iter().cloned().collect();
    let mut unique = Vec::with_capacity(deltas.len());
    for delta in deltas {
        if known.insert(delta.hash_key()) {
            unique.push(delta);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_delta(content: &str) -> PlaybookDelta {
        PlaybookDelta::Add {
            bullet: DraftBullet {
                content: content.to_string(),
                category: "testing".to_string(),
                scope: BulletScope::Global,
                kind: BulletKind::WorkflowRule,
                is_negative: false,
            },
            source_session: None,
            reason: "observed".to_string(),
        }
    }

    #[test]
    fn test_add_hash_is_case_folded() {
        let a = add_delta("Run Tests First");
        let b = add_delta("run tests first");
        assert_eq!(a.hash_key(), b.hash_key());
    }

    #[test]
    fn test_merge_hash_sorts_ids() {
        let a = PlaybookDelta::Merge {
            bullet_ids: vec!["b-2".to_string(), "b-1".to_string()],
            merged_content: "merged".to_string(),
            category: None,
            reason: String::new(),
        };
        let b = PlaybookDelta::Merge {
            bullet_ids: vec!["b-1".to_string(), "b-2".to_string()],
            merged_content: "different".to_string(),
            category: None,
            reason: String::new(),
        };
        assert_eq!(a.hash_key(), b.hash_key());
        assert_eq!(a.hash_key(), "merge:b-1,b-2");
    }

    #[test]
    fn test_dedup_is_subset_and_set() {
        let deltas = vec![
            add_delta("alpha"),
            add_delta("Alpha"),
            add_delta("beta"),
            PlaybookDelta::Helpful {
                bullet_id: "b-1".to_string(),
                source_session: None,
                reason: String::new(),
            },
            PlaybookDelta::Helpful {
                bullet_id: "b-1".to_string(),
                source_session: Some("s".to_string()),
                reason: String::new(),
            },
        ];

        let unique = dedup_deltas(deltas, &[]);
        assert_eq!(unique.len(), 3);
        let keys: std::collections::HashSet<String> =
            unique.iter().map(PlaybookDelta::hash_key).collect();
        assert_eq!(keys.len(), unique.len());
    }

    #[test]
    fn test_dedup_respects_prior_hashes() {
        let deltas = vec![add_delta("alpha")];
        let unique = dedup_deltas(deltas, &["add:alpha".to_string()]);
        assert!(unique.is_empty());
    }

    #[test]
    fn test_inject_source_session_only_fills_missing() {
        let mut delta = add_delta("alpha");
        delta.inject_source_session("/tmp/s1.jsonl");
        assert_eq!(delta.source_session(), Some("/tmp/s1.jsonl"));

        delta.inject_source_session("/tmp/s2.jsonl");
        assert_eq!(delta.source_session(), Some("/tmp/s1.jsonl"));
    }

    #[test]
    fn test_tagged_deserialization() {
        let json = r#"{"type":"harmful","bulletId":"b-9","reason":"misled the agent"}"#;
        let delta: PlaybookDelta = serde_json::from_str(json).unwrap();
        assert_eq!(delta.hash_key(), "harmful:b-9");
    }
}
