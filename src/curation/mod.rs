//! Curation: applying deltas to the playbook with conflict resolution.
//!
//! Deltas are deduplicated, applied in order, and followed by an inversion
//! pass that turns repeatedly harmful rules into explicit anti-patterns.
//! Skipped deltas (missing ids, duplicates, invariant violations) are
//! counted, never fatal.

use crate::config::MemoryConfig;
use crate::models::{
    dedup_deltas, BulletKind, BulletState, Maturity, Playbook, PlaybookBullet, PlaybookDelta,
};
use crate::scoring::{get_decayed_counts, next_maturity};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// One harmful rule turned into an anti-pattern.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inversion {
    /// The deprecated bullet.
    pub original_id: String,
    /// Its content, as recorded in the toxic log.
    pub original_content: String,
    /// The generated anti-pattern bullet, when one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anti_pattern_id: Option<String>,
}

/// Result of one curation run.
#[derive(Debug, Default)]
pub struct CurationOutcome {
    /// Deltas applied.
    pub applied: usize,
    /// Deltas skipped.
    pub skipped: usize,
    /// Inversions performed.
    pub inversions: Vec<Inversion>,
}

/// Applies a delta sequence to the playbook.
///
/// `toxic` holds case-folded contents that are permanently blocked; `add`
/// deltas matching it are skipped so a bad rule cannot be resurrected.
pub fn curate(
    playbook: &mut Playbook,
    deltas: Vec<PlaybookDelta>,
    config: &MemoryConfig,
    toxic: &HashSet<String>,
    now: DateTime<Utc>,
) -> CurationOutcome {
    let incoming = deltas.len();
    let deltas = dedup_deltas(deltas, &[]);

    let mut outcome = CurationOutcome {
        skipped: incoming - deltas.len(),
        ..CurationOutcome::default()
    };

    for delta in deltas {
        let applied = apply_delta(playbook, delta, config, toxic, now);
        if applied {
            outcome.applied += 1;
        } else {
            outcome.skipped += 1;
        }
    }

    outcome.inversions = invert_harmful(playbook, config, now);
    outcome
}

fn apply_delta(
    playbook: &mut Playbook,
    delta: PlaybookDelta,
    config: &MemoryConfig,
    toxic: &HashSet<String>,
    now: DateTime<Utc>,
) -> bool {
    match delta {
        PlaybookDelta::Add {
            bullet: draft,
            source_session,
            reason,
        } => {
            let folded = draft.content.trim().to_lowercase();
            if toxic.contains(&folded) {
                tracing::info!(content = %draft.content, "add blocked by toxic log");
                return false;
            }
            if playbook.has_duplicate_content(&draft.content, draft.scope) {
                tracing::debug!(content = %draft.content, "add skipped: duplicate content");
                return false;
            }

            let mut bullet =
                PlaybookBullet::new(draft.content, draft.category, draft.scope, draft.kind, now);
            bullet.is_negative = draft.is_negative;
            bullet.confidence_decay_half_life_days = config.scoring.decay_half_life_days;
            if let Some(session) = source_session {
                bullet.source_sessions.push(session);
            }
            if !reason.is_empty() {
                bullet.tags.push(format!("reason:{reason}"));
            }
            playbook.bullets.push(bullet);
            true
        },

        PlaybookDelta::Replace {
            bullet_id,
            new_content,
            ..
        } => {
            let scope = match playbook.find_bullet(&bullet_id) {
                Some(b) if b.is_live() => b.scope,
                _ => return false,
            };
            // A rewrite must not collide with another live rule.
            if playbook
                .bullets
                .iter()
                .any(|b| b.id != bullet_id && b.is_live() && b.scope == scope
                    && b.content.trim().to_lowercase() == new_content.trim().to_lowercase())
            {
                return false;
            }

            let Some(bullet) = playbook.find_bullet_mut(&bullet_id) else {
                return false;
            };
            bullet.content = new_content;
            bullet.updated_at = now;
            // Rewritten content has to re-earn its trust.
            bullet.maturity = Maturity::Candidate;
            true
        },

        PlaybookDelta::Merge {
            bullet_ids,
            merged_content,
            category,
            reason,
        } => merge_bullets(playbook, &bullet_ids, merged_content, category, &reason, config, now),

        PlaybookDelta::Deprecate {
            bullet_id,
            reason,
            replaced_by,
        } => {
            let replacement_live = replaced_by
                .as_deref()
                .is_some_and(|id| playbook.find_bullet(id).is_some_and(PlaybookBullet::is_live));
            let Some(bullet) = playbook.find_bullet_mut(&bullet_id) else {
                return false;
            };
            if !bullet.is_live() {
                return false;
            }
            bullet.deprecate(reason, now);
            if replacement_live {
                bullet.replaced_by = replaced_by;
            }
            true
        },

        PlaybookDelta::Helpful {
            bullet_id,
            source_session,
            ..
        } => record_feedback(playbook, &bullet_id, true, source_session, config, now),

        PlaybookDelta::Harmful {
            bullet_id,
            source_session,
            ..
        } => record_feedback(playbook, &bullet_id, false, source_session, config, now),
    }
}

fn record_feedback(
    playbook: &mut Playbook,
    bullet_id: &str,
    helpful: bool,
    source_session: Option<String>,
    config: &MemoryConfig,
    now: DateTime<Utc>,
) -> bool {
    let Some(bullet) = playbook.find_bullet_mut(bullet_id) else {
        return false;
    };
    if !bullet.is_live() {
        return false;
    }

    let feedback_type = if helpful {
        crate::models::FeedbackType::Helpful
    } else {
        crate::models::FeedbackType::Harmful
    };
    bullet.record_feedback(feedback_type, source_session, now);

    // Deprecation is the inversion pass's call, not the feedback update's.
    let maturity = next_maturity(bullet, &config.scoring, now);
    if maturity != Maturity::Deprecated {
        bullet.maturity = maturity;
    }
    if bullet.state == BulletState::Draft
        && bullet.feedback_events.len() >= config.scoring.min_feedback_for_active as usize
    {
        bullet.state = BulletState::Active;
    }
    true
}

fn merge_bullets(
    playbook: &mut Playbook,
    bullet_ids: &[String],
    merged_content: String,
    category: Option<String>,
    reason: &str,
    config: &MemoryConfig,
    now: DateTime<Utc>,
) -> bool {
    if bullet_ids.len() < 2 {
        return false;
    }
    let sources: Vec<usize> = playbook
        .bullets
        .iter()
        .enumerate()
        .filter(|(_, b)| bullet_ids.contains(&b.id) && b.is_live())
        .map(|(index, _)| index)
        .collect();
    if sources.len() != bullet_ids.len() {
        return false;
    }

    let first = &playbook.bullets[sources[0]];
    let scope = first.scope;
    let kind = first.kind;
    // The caller's category wins; the first merged bullet's otherwise.
    let category = category.unwrap_or_else(|| first.category.clone());

    let mut merged = PlaybookBullet::new(merged_content, category, scope, kind, now);
    merged.confidence_decay_half_life_days = config.scoring.decay_half_life_days;
    merged.state = BulletState::Active;
    for &index in &sources {
        let source = &playbook.bullets[index];
        merged.source_sessions.extend(source.source_sessions.iter().cloned());
        merged.source_agents.extend(source.source_agents.iter().cloned());
        merged.tags.extend(source.tags.iter().cloned());
    }
    merged.source_sessions.dedup();
    merged.source_agents.dedup();
    merged.tags.dedup();

    let merged_id = merged.id.clone();
    playbook.bullets.push(merged);

    for &index in &sources {
        let source = &mut playbook.bullets[index];
        source.deprecate(format!("merged into {merged_id}: {reason}"), now);
        source.replaced_by = Some(merged_id.clone());
    }
    true
}

/// Deprecates repeatedly harmful bullets and generates `AVOID:` anti-patterns.
fn invert_harmful(
    playbook: &mut Playbook,
    config: &MemoryConfig,
    now: DateTime<Utc>,
) -> Vec<Inversion> {
    let mut inversions = Vec::new();

    let candidates: Vec<usize> = playbook
        .bullets
        .iter()
        .enumerate()
        .filter(|(_, b)| {
            if !b.is_live() || b.pinned || b.is_negative {
                return false;
            }
            let counts = get_decayed_counts(b, &config.scoring, now);
            counts.harmful >= config.scoring.prune_harmful_threshold
                && counts.harmful_ratio() >= 0.5
        })
        .map(|(index, _)| index)
        .collect();

    for index in candidates {
        let (original_id, original_content, category, scope) = {
            let bullet = &playbook.bullets[index];
            (
                bullet.id.clone(),
                bullet.content.clone(),
                bullet.category.clone(),
                bullet.scope,
            )
        };

        let anti_content = format!("AVOID: {original_content}");
        let anti_pattern_id = if playbook.has_duplicate_content(&anti_content, scope) {
            None
        } else {
            let mut anti = PlaybookBullet::new(anti_content, category, scope, BulletKind::AntiPattern, now);
            anti.is_negative = true;
            anti.state = BulletState::Active;
            anti.confidence_decay_half_life_days = config.scoring.decay_half_life_days;
            anti.source_sessions = playbook.bullets[index].source_sessions.clone();
            anti.source_agents = playbook.bullets[index].source_agents.clone();
            anti.tags = playbook.bullets[index].tags.clone();
            let id = anti.id.clone();
            playbook.bullets.push(anti);
            Some(id)
        };

        let bullet = &mut playbook.bullets[index];
        bullet.deprecate("repeatedly harmful; inverted into anti-pattern", now);
        bullet.replaced_by.clone_from(&anti_pattern_id);

        tracing::info!(
            bullet = %original_id,
            anti_pattern = anti_pattern_id.as_deref().unwrap_or("none"),
            "inverted harmful rule"
        );
        inversions.push(Inversion {
            original_id,
            original_content,
            anti_pattern_id,
        });
    }

    inversions
}

/// One line of `toxic_bullets.log`: rule content that may never return.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToxicEntry {
    /// The blocked rule content, verbatim.
    pub content: String,
    /// Why it was blocked.
    pub reason: String,
    /// When it was blocked.
    pub recorded_at: DateTime<Utc>,
}

/// Loads the toxic log as a case-folded content set, failing open.
#[must_use]
pub fn load_toxic_contents(path: &std::path::Path) -> HashSet<String> {
    match crate::storage::jsonl::read_jsonl::<ToxicEntry>(path) {
        Ok(entries) => entries
            .into_iter()
            .map(|entry| entry.content.trim().to_lowercase())
            .collect(),
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "toxic log unreadable; continuing without it");
            HashSet::new()
        },
    }
}

/// Result of a prune pass.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneOutcome {
    /// Retired tombstones removed.
    pub removed_retired: usize,
    /// Stale unproven drafts removed.
    pub removed_stale: usize,
}

/// Removes non-pinned tombstones and stale candidates from the playbook.
pub fn prune(playbook: &mut Playbook, config: &MemoryConfig, now: DateTime<Utc>) -> PruneOutcome {
    let mut outcome = PruneOutcome::default();
    let stale_after = config.scoring.stale_after_days;

    playbook.bullets.retain(|bullet| {
        if bullet.pinned {
            return true;
        }
        if bullet.state == BulletState::Retired {
            outcome.removed_retired += 1;
            return false;
        }
        if bullet.maturity == Maturity::Candidate
            && crate::scoring::is_stale(bullet, stale_after, now)
        {
            outcome.removed_stale += 1;
            return false;
        }
        true
    });

    outcome
}
