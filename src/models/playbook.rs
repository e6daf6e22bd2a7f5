//! The playbook: curated rules plus merge and invariant checks.

use super::bullet::{BulletState, Maturity, PlaybookBullet};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current on-disk schema version.
pub const PLAYBOOK_SCHEMA_VERSION: u32 = 1;

/// Playbook bookkeeping metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybookMetadata {
    /// Semantic version of the playbook content.
    #[serde(default = "default_version")]
    pub version: String,
    /// Creation timestamp.
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
    /// How many reflections have been folded in.
    #[serde(default, alias = "total_reflections")]
    pub total_reflections: u64,
    /// When the last reflection ran.
    #[serde(default, alias = "last_reflection", skip_serializing_if = "Option::is_none")]
    pub last_reflection: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl PlaybookMetadata {
    /// Creates metadata stamped at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: default_version(),
            created_at: now,
            updated_at: now,
            total_reflections: 0,
            last_reflection: None,
        }
    }
}

/// A pattern retired playbook-wide, with its replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeprecatedPattern {
    /// The retired pattern text.
    pub pattern: String,
    /// What to use instead, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Why it was retired.
    pub reason: String,
    /// When it was retired.
    #[serde(alias = "deprecated_at")]
    pub deprecated_at: DateTime<Utc>,
}

/// The curated collection of rules and anti-patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playbook {
    /// On-disk schema version.
    #[serde(default = "default_schema_version", alias = "schema_version")]
    pub schema_version: u32,
    /// Bookkeeping metadata.
    pub metadata: PlaybookMetadata,
    /// The rules.
    #[serde(default)]
    pub bullets: Vec<PlaybookBullet>,
    /// Playbook-wide retired patterns.
    #[serde(default, alias = "deprecated_patterns")]
    pub deprecated_patterns: Vec<DeprecatedPattern>,
}

fn default_schema_version() -> u32 {
    PLAYBOOK_SCHEMA_VERSION
}

impl Playbook {
    /// Creates an empty playbook stamped at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            schema_version: PLAYBOOK_SCHEMA_VERSION,
            metadata: PlaybookMetadata::new(now),
            bullets: Vec::new(),
            deprecated_patterns: Vec::new(),
        }
    }

    /// Finds a bullet by id.
    #[must_use]
    pub fn find_bullet(&self, id: &str) -> Option<&PlaybookBullet> {
        self.bullets.iter().find(|b| b.id == id)
    }

    /// Finds a bullet by id, mutably.
    pub fn find_bullet_mut(&mut self, id: &str) -> Option<&mut PlaybookBullet> {
        self.bullets.iter_mut().find(|b| b.id == id)
    }

    /// Whether a live bullet with case-folded identical content exists in the scope.
    #[must_use]
    pub fn has_duplicate_content(&self, content: &str, scope: super::BulletScope) -> bool {
        let folded = content.trim().to_lowercase();
        self.bullets.iter().any(|b| {
            b.is_live() && b.scope == scope && b.content.trim().to_lowercase() == folded
        })
    }

    /// Checks the playbook invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] naming the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        let ids: HashMap<&str, &PlaybookBullet> =
            self.bullets.iter().map(|b| (b.id.as_str(), b)).collect();

        for bullet in &self.bullets {
            let helpful_events = bullet
                .feedback_events
                .iter()
                .filter(|e| e.feedback_type == super::FeedbackType::Helpful)
                .count();
            let harmful_events = bullet.feedback_events.len() - helpful_events;
            if helpful_events != bullet.helpful_count as usize
                || harmful_events != bullet.harmful_count as usize
            {
                return Err(Error::Schema(format!(
                    "bullet {}: counters ({}/{}) disagree with feedback events ({helpful_events}/{harmful_events})",
                    bullet.id, bullet.helpful_count, bullet.harmful_count
                )));
            }

            if bullet.deprecated
                && (bullet.state != BulletState::Retired || bullet.maturity != Maturity::Deprecated)
            {
                return Err(Error::Schema(format!(
                    "bullet {}: deprecated but state={} maturity={}",
                    bullet.id,
                    bullet.state.as_str(),
                    bullet.maturity.as_str()
                )));
            }

            if let Some(replacement) = &bullet.replaced_by {
                match ids.get(replacement.as_str()) {
                    Some(target) if target.is_live() => {},
                    Some(_) => {
                        return Err(Error::Schema(format!(
                            "bullet {}: replacedBy {replacement} is retired",
                            bullet.id
                        )));
                    },
                    None => {
                        return Err(Error::Schema(format!(
                            "bullet {}: replacedBy {replacement} does not exist",
                            bullet.id
                        )));
                    },
                }
            }
        }

        let mut seen: HashMap<(String, super::BulletScope), &str> = HashMap::new();
        for bullet in self.bullets.iter().filter(|b| b.state != BulletState::Retired) {
            let key = (bullet.content.trim().to_lowercase(), bullet.scope);
            if let Some(existing) = seen.insert(key, bullet.id.as_str()) {
                return Err(Error::Schema(format!(
                    "bullets {existing} and {} share identical content in scope {}",
                    bullet.id,
                    bullet.scope.as_str()
                )));
            }
        }

        Ok(())
    }

    /// Merges a repo-overlay playbook over a global one.
    ///
    /// Bullets are unioned by id with repo entries overriding; deprecated
    /// patterns are concatenated repo-last; `updated_at` takes the max.
    #[must_use]
    pub fn merge(global: &Self, repo: &Self) -> Self {
        let mut merged = global.clone();

        for bullet in &repo.bullets {
            if let Some(existing) = merged.find_bullet_mut(&bullet.id) {
                *existing = bullet.clone();
            } else {
                merged.bullets.push(bullet.clone());
            }
        }

        merged
            .deprecated_patterns
            .extend(repo.deprecated_patterns.iter().cloned());

        merged.metadata.updated_at = global
            .metadata
            .updated_at
            .max(repo.metadata.updated_at);
        merged.metadata.total_reflections =
            global.metadata.total_reflections + repo.metadata.total_reflections;
        merged.metadata.last_reflection = match (
            global.metadata.last_reflection,
            repo.metadata.last_reflection,
        ) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        merged
    }
}
