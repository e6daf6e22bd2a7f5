//! Safety guard: blocks commands matching persisted trauma patterns.
//!
//! Trauma entries live in `traumas.jsonl` globally and in the repo overlay;
//! active entries from both tiers are unioned. The guard fails open: if the
//! files cannot be read, no patterns load and nothing is blocked.

use crate::models::TraumaEntry;
use crate::storage::jsonl::{append_jsonl, read_jsonl};
use crate::storage::lock::with_lock;
use crate::storage::paths::MemoryPaths;
use crate::Result;
use regex::RegexBuilder;
use serde::Serialize;
use std::path::Path;

/// The guard's answer for one command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum GuardDecision {
    /// No trauma pattern matched.
    Allow,
    /// A trauma pattern matched; the host must not run the command.
    #[serde(rename_all = "camelCase")]
    Deny {
        /// Why the command is blocked.
        reason: String,
        /// The pattern that matched.
        pattern: String,
        /// Id of the matching trauma entry.
        entry_id: String,
    },
}

impl GuardDecision {
    /// Whether the command is blocked.
    #[must_use]
    pub const fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }
}

/// Loads active trauma entries from both tiers, failing open.
#[must_use]
pub fn load_active_traumas(paths: &MemoryPaths) -> Vec<TraumaEntry> {
    let mut entries = read_tier(&paths.traumas());
    if let Some(repo) = paths.repo_traumas() {
        entries.extend(read_tier(&repo));
    }
    entries.retain(TraumaEntry::is_active);
    entries
}

fn read_tier(path: &Path) -> Vec<TraumaEntry> {
    match read_jsonl(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "trauma file unreadable; failing open");
            Vec::new()
        },
    }
}

/// Checks a command against the given trauma entries.
///
/// Matching is case-insensitive; the first matching pattern decides. An
/// entry whose pattern fails to compile is skipped.
#[must_use]
pub fn check_command(command: &str, traumas: &[TraumaEntry]) -> GuardDecision {
    for entry in traumas {
        let regex = match RegexBuilder::new(&entry.pattern).case_insensitive(true).build() {
            Ok(regex) => regex,
            Err(e) => {
                tracing::warn!(entry = %entry.id, error = %e, "skipping uncompilable trauma pattern");
                continue;
            },
        };
        if regex.is_match(command) {
            return GuardDecision::Deny {
                reason: format!(
                    "command matches a banned pattern ({}): {}",
                    entry.severity.as_str(),
                    entry.trigger_event.human_message
                ),
                pattern: entry.pattern.clone(),
                entry_id: entry.id.clone(),
            };
        }
    }
    GuardDecision::Allow
}

/// Convenience wrapper: load both tiers and check one command.
#[must_use]
pub fn check(command: &str, paths: &MemoryPaths) -> GuardDecision {
    check_command(command, &load_active_traumas(paths))
}

/// Appends a trauma entry to the global tier under its file lock.
///
/// # Errors
///
/// Returns lock or write errors.
pub fn record_trauma(paths: &MemoryPaths, entry: &TraumaEntry) -> Result<()> {
    let target = paths.traumas();
    with_lock(&target, "record_trauma", || append_jsonl(&target, entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TraumaSeverity, TraumaStatus, TriggerEvent};
    use chrono::Utc;

    fn entry(id: &str, pattern: &str, status: TraumaStatus) -> TraumaEntry {
        TraumaEntry {
            id: id.to_string(),
            severity: TraumaSeverity::Fatal,
            pattern: pattern.to_string(),
            scope: "global".to_string(),
            status,
            trigger_event: TriggerEvent {
                session_path: "/tmp/s.jsonl".to_string(),
                timestamp: Utc::now(),
                human_message: "never again".to_string(),
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_matching_command_is_denied() {
        let traumas = [entry("t-1", r"rm\s+-rf\s+/", TraumaStatus::Active)];
        let decision = check_command("sudo RM -RF / --no-preserve-root", &traumas);
        assert!(decision.is_deny());
        match decision {
            GuardDecision::Deny { entry_id, pattern, .. } => {
                assert_eq!(entry_id, "t-1");
                assert_eq!(pattern, r"rm\s+-rf\s+/");
            },
            GuardDecision::Allow => unreachable!(),
        }
    }

    #[test]
    fn test_non_matching_command_is_allowed() {
        let traumas = [entry("t-1", r"rm\s+-rf\s+/", TraumaStatus::Active)];
        assert!(!check_command("cargo build", &traumas).is_deny());
    }

    #[test]
    fn test_bad_pattern_is_skipped() {
        let traumas = [
            entry("t-bad", "([unclosed", TraumaStatus::Active),
            entry("t-good", "drop\\s+table", TraumaStatus::Active),
        ];
        let decision = check_command("DROP TABLE users", &traumas);
        assert!(decision.is_deny());
    }

    #[test]
    fn test_tiers_are_unioned_and_healed_excluded() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join(".git")).unwrap();
        std::fs::create_dir_all(repo.join(".cass")).unwrap();

        let config = crate::config::MemoryConfig::default()
            .with_home(dir.path().join("mem"))
            .with_cwd(&repo);
        let paths = MemoryPaths::from_config(&config);
        paths.ensure_layout().unwrap();

        append_jsonl(&paths.traumas(), &entry("t-global", "global-ban", TraumaStatus::Active)).unwrap();
        append_jsonl(&paths.traumas(), &entry("t-healed", "healed-ban", TraumaStatus::Healed)).unwrap();
        append_jsonl(
            &paths.repo_traumas().unwrap(),
            &entry("t-repo", "repo-ban", TraumaStatus::Active),
        )
        .unwrap();

        let active = load_active_traumas(&paths);
        let ids: Vec<&str> = active.iter().map(|e| e.id.as_str()).collect();
        assert!(ids.contains(&"t-global"));
        assert!(ids.contains(&"t-repo"));
        assert!(!ids.contains(&"t-healed"));

        assert!(check("run the global-ban thing", &paths).is_deny());
        assert!(!check("run the healed-ban thing", &paths).is_deny());
    }

    #[test]
    fn test_unreadable_files_fail_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = crate::config::MemoryConfig::default()
            .with_home(dir.path().join("mem"))
            .with_cwd(dir.path());
        let paths = MemoryPaths::from_config(&config);

        // Nothing on disk at all.
        assert!(load_active_traumas(&paths).is_empty());
        assert!(!check("anything", &paths).is_deny());

        // Garbage lines are skipped by the reader.
        paths.ensure_layout().unwrap();
        std::fs::write(paths.traumas(), "not json\n{also broken\n").unwrap();
        assert!(load_active_traumas(&paths).is_empty());
    }
}
