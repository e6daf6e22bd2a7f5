//! The reflect pipeline: sessions in, curated playbook out.
//!
//! Discover unprocessed sessions → for each: export + sanitize → extract a
//! diary → iterate reflection into deltas → evidence-gate each add →
//! accumulate. Then, under the playbook lock: reload from disk, curate,
//! persist, and mark the sessions processed.

use super::{reflect, ReflectionOutcome};
use crate::config::MemoryConfig;
use crate::curation::{curate, load_toxic_contents, ToxicEntry};
use crate::history::{CassAdapter, ExportFormat, SearchOptions};
use crate::models::{
    BulletState, DiaryEntry, PlaybookDelta, ProcessedEntry, SessionStatus,
};
use crate::oracle::Oracle;
use crate::sanitize::Sanitizer;
use crate::storage::diary::DiaryStore;
use crate::storage::jsonl::{append_jsonl, read_jsonl};
use crate::storage::paths::MemoryPaths;
use crate::storage::playbook::{load_merged, PlaybookStore};
use crate::validation::evidence_count_gate;
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;

/// Character cap on transcript text handed to the diary extractor.
const TRANSCRIPT_PROMPT_LIMIT: usize = 12_000;

/// Options for one reflect run.
#[derive(Debug, Clone, Default)]
pub struct ReflectOptions {
    /// Explicit session transcripts to process.
    pub sessions: Vec<PathBuf>,
    /// Also discover sessions from the last N days via the history tool.
    pub days: Option<u32>,
    /// Gather and validate deltas but leave the playbook untouched.
    pub dry_run: bool,
}

/// Per-session outcome.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// The session transcript.
    pub session_path: String,
    /// Diary produced for it.
    pub diary_id: String,
    /// Deltas the reflection produced.
    pub deltas_generated: usize,
    /// Adds rejected by the evidence gate.
    pub rejected_by_gate: usize,
}

/// Outcome of a whole reflect run.
#[derive(Debug, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectReport {
    /// Sessions processed this run.
    pub sessions: Vec<SessionReport>,
    /// Sessions skipped because they were already processed.
    pub already_processed: usize,
    /// Deltas applied by curation.
    pub applied: usize,
    /// Deltas skipped by curation.
    pub skipped: usize,
    /// Harmful rules inverted into anti-patterns.
    pub inversions: usize,
    /// Set when the history tool was unavailable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    /// True for a dry run.
    pub dry_run: bool,
}

/// Runs the reflect pipeline.
///
/// # Errors
///
/// Returns [`Error::Validation`] when no sessions were given or discovered,
/// and storage errors from the final curation step. Per-session failures
/// (unreadable transcripts, oracle hiccups) are logged and skipped.
pub fn run_reflect(
    options: &ReflectOptions,
    config: &MemoryConfig,
    oracle: &dyn Oracle,
) -> Result<ReflectReport> {
    let paths = MemoryPaths::from_config(config);
    paths.ensure_layout()?;

    let sanitizer = Sanitizer::from_config(&config.sanitization)?;
    let adapter = CassAdapter::new(config.cass_path.clone());
    let mut report = ReflectReport {
        dry_run: options.dry_run,
        ..ReflectReport::default()
    };

    let tool_available = adapter.available();
    if !tool_available {
        let degradation = adapter.handle_unavailable();
        tracing::info!(mode = degradation.fallback_mode, "{}", degradation.message);
        report.degraded = Some(degradation.message);
    }

    // Discovery: explicit paths plus recent sessions from the indexer.
    let mut candidates: Vec<PathBuf> = options.sessions.clone();
    if let Some(days) = options.days {
        if tool_available {
            candidates.extend(discover_recent(&adapter, days));
        }
    }
    if candidates.is_empty() {
        return Err(Error::Validation(
            "no sessions to reflect on; pass session paths or --days".to_string(),
        ));
    }

    let processed_log = paths.processed_log();
    let processed: HashSet<String> = read_jsonl::<ProcessedEntry>(&processed_log)?
        .into_iter()
        .map(|entry| entry.session_path)
        .collect();

    let mut pending: Vec<PathBuf> = Vec::new();
    let mut seen = HashSet::new();
    for candidate in candidates {
        let key = candidate.to_string_lossy().into_owned();
        if processed.contains(&key) {
            report.already_processed += 1;
            continue;
        }
        if seen.insert(key) {
            pending.push(candidate);
        }
    }
    if let Some(cap) = config.budget.max_sessions_per_run {
        pending.truncate(cap as usize);
    }

    // Lock-free snapshot for prompting; the write path re-reads under lock.
    let playbook_snapshot = load_merged(&paths)?;
    let diary_store = DiaryStore::new(&paths.diary_dir);

    let mut all_deltas: Vec<PlaybookDelta> = Vec::new();
    let mut auto_active: HashSet<String> = HashSet::new();

    for session in &pending {
        let session_key = session.to_string_lossy().into_owned();
        let Some(transcript) = adapter.export(session, ExportFormat::Text, &sanitizer) else {
            tracing::warn!(session = %session_key, "transcript unreadable; skipping session");
            continue;
        };

        let diary = extract_diary(oracle, &transcript, &session_key);
        if let Err(e) = diary_store.save(&diary) {
            tracing::warn!(session = %session_key, error = %e, "could not persist diary");
        }

        let history = related_history(&adapter, tool_available, &diary);
        let ReflectionOutcome {
            deltas, iterations, ..
        } = reflect(oracle, &diary, &playbook_snapshot, &history, config);
        tracing::debug!(
            session = %session_key,
            deltas = deltas.len(),
            iterations,
            "reflection complete"
        );

        let mut rejected = 0;
        let mut kept = Vec::new();
        for delta in deltas {
            match &delta {
                PlaybookDelta::Add { bullet, .. } => {
                    let gate = evidence_count_gate(&bullet.content, config, &adapter);
                    if !gate.passed {
                        tracing::info!(content = %bullet.content, reason = %gate.reason, "add rejected by evidence gate");
                        rejected += 1;
                        continue;
                    }
                    if gate.suggested_state == Some(BulletState::Active) {
                        auto_active.insert(bullet.content.trim().to_lowercase());
                    }
                    kept.push(delta);
                },
                _ => kept.push(delta),
            }
        }

        report.sessions.push(SessionReport {
            session_path: session_key,
            diary_id: diary.id.clone(),
            deltas_generated: kept.len(),
            rejected_by_gate: rejected,
        });
        all_deltas.extend(kept);
    }

    if options.dry_run {
        return Ok(report);
    }

    let toxic = load_toxic_contents(&paths.toxic_log());
    let store = PlaybookStore::new(&paths.playbook);
    let now = Utc::now();

    let outcome = store.update("reflect", |playbook| {
        let outcome = curate(playbook, all_deltas.clone(), config, &toxic, now);
        for bullet in &mut playbook.bullets {
            if bullet.state == BulletState::Draft
                && auto_active.contains(&bullet.content.trim().to_lowercase())
            {
                bullet.state = BulletState::Active;
            }
        }
        playbook.metadata.total_reflections += 1;
        playbook.metadata.last_reflection = Some(now);
        Ok(outcome)
    })?;

    for inversion in &outcome.inversions {
        let entry = ToxicEntry {
            content: inversion.original_content.clone(),
            reason: "inverted after repeated harm".to_string(),
            recorded_at: now,
        };
        if let Err(e) = append_jsonl(&paths.toxic_log(), &entry) {
            tracing::warn!(error = %e, "could not append to toxic log");
        }
    }

    for session in &report.sessions {
        let entry = ProcessedEntry {
            session_path: session.session_path.clone(),
            processed_at: now,
            diary_id: session.diary_id.clone(),
            deltas_generated: session.deltas_generated as u32,
        };
        append_jsonl(&processed_log, &entry)?;
    }

    report.applied = outcome.applied;
    report.skipped = outcome.skipped;
    report.inversions = outcome.inversions.len();
    Ok(report)
}

/// Discovers distinct session paths seen by the indexer in the last `days`.
fn discover_recent(adapter: &CassAdapter, days: u32) -> Vec<PathBuf> {
    let options = SearchOptions {
        limit: 200,
        days: Some(days),
        ..SearchOptions::default()
    };
    let mut paths: Vec<PathBuf> = Vec::new();
    let mut seen = HashSet::new();
    for hit in adapter.safe_search("*", &options) {
        if seen.insert(hit.source_path.clone()) {
            paths.push(PathBuf::from(hit.source_path));
        }
    }
    paths
}

/// JSON schema for diary extraction.
fn diary_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "status": {"enum": ["success", "failure", "mixed"]},
            "agent": {"type": "string"},
            "workspace": {"type": "string"},
            "accomplishments": {"type": "array", "items": {"type": "string"}},
            "decisions": {"type": "array", "items": {"type": "string"}},
            "challenges": {"type": "array", "items": {"type": "string"}},
            "preferences": {"type": "array", "items": {"type": "string"}},
            "keyLearnings": {"type": "array", "items": {"type": "string"}},
            "tags": {"type": "array", "items": {"type": "string"}},
            "searchAnchors": {"type": "array", "items": {"type": "string"}}
        }
    })
}

/// Extracts a structured diary from a sanitized transcript.
///
/// Oracle failure yields a minimal diary so the pipeline can still mark the
/// session processed; playbook-only mode runs this way permanently.
fn extract_diary(oracle: &dyn Oracle, transcript: &str, session_path: &str) -> DiaryEntry {
    let now = Utc::now();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let id = format!("d-{}-{}", now.timestamp_millis(), &suffix[..6]);
    let mut diary = DiaryEntry::new(id, session_path, now);

    let excerpt: String = transcript.chars().take(TRANSCRIPT_PROMPT_LIMIT).collect();
    let prompt = format!(
        "Summarize this coding session transcript as a diary. Report concrete \
         accomplishments, decisions, challenges, user preferences, and durable learnings. \
         Add short searchAnchors phrases for finding this session later.\n\n{excerpt}"
    );

    match oracle.extract(&diary_schema(), &prompt) {
        Ok(value) => {
            apply_diary_fields(&mut diary, &value);
            diary
        },
        Err(e) => {
            tracing::debug!(session = session_path, error = %e, "diary extraction degraded to minimal entry");
            diary
        },
    }
}

fn apply_diary_fields(diary: &mut DiaryEntry, value: &serde_json::Value) {
    if let Some(status) = value.get("status").and_then(serde_json::Value::as_str) {
        diary.status = match status {
            "success" => SessionStatus::Success,
            "failure" => SessionStatus::Failure,
            _ => SessionStatus::Mixed,
        };
    }
    if let Some(agent) = value.get("agent").and_then(serde_json::Value::as_str) {
        diary.agent = agent.to_string();
    }
    if let Some(workspace) = value.get("workspace").and_then(serde_json::Value::as_str) {
        diary.workspace = workspace.to_string();
    }

    let string_list = |field: &str| -> Vec<String> {
        value
            .get(field)
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    };
    diary.accomplishments = string_list("accomplishments");
    diary.decisions = string_list("decisions");
    diary.challenges = string_list("challenges");
    diary.preferences = string_list("preferences");
    diary.key_learnings = string_list("keyLearnings");
    diary.tags = string_list("tags");
    diary.search_anchors = string_list("searchAnchors");
}

/// Pulls up to five related snippets for the reflection prompt.
fn related_history(
    adapter: &CassAdapter,
    available: bool,
    diary: &DiaryEntry,
) -> Vec<crate::history::HistoryHit> {
    if !available {
        return Vec::new();
    }
    let query = diary
        .search_anchors
        .first()
        .cloned()
        .or_else(|| diary.key_learnings.first().cloned());
    let Some(query) = query else {
        return Vec::new();
    };

    adapter.safe_search(
        &query,
        &SearchOptions {
            limit: super::MAX_HISTORY_SNIPPETS,
            ..SearchOptions::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn session_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(
            &path,
            "{\"role\":\"user\",\"content\":\"please fix the tests\"}\n{\"role\":\"assistant\",\"content\":\"fixed by isolating ports\"}\n",
        )
        .unwrap();
        path
    }

    struct AddingOracle;

    impl Oracle for AddingOracle {
        fn name(&self) -> &'static str {
            "adding-stub"
        }

        fn extract(&self, schema: &serde_json::Value, _prompt: &str) -> crate::Result<serde_json::Value> {
            // The diary schema has no "deltas" property; answer accordingly.
            if schema.pointer("/properties/deltas").is_some() {
                Ok(serde_json::json!({
                    "deltas": [{
                        "type": "add",
                        "bullet": {"content": "Isolate ports in integration tests", "category": "testing"},
                        "reason": "session proved it"
                    }]
                }))
            } else {
                Ok(serde_json::json!({
                    "status": "success",
                    "keyLearnings": ["Isolating ports fixes flaky tests"],
                    "searchAnchors": ["flaky test ports"]
                }))
            }
        }
    }

    fn test_config(dir: &Path) -> MemoryConfig {
        MemoryConfig {
            provider: "none".to_string(),
            cass_path: Some(PathBuf::from("/definitely/not/here/cass")),
            ..MemoryConfig::default()
        }
        .with_home(dir.join("mem"))
        .with_cwd(dir)
    }

    #[test]
    fn test_reflect_requires_sessions() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = test_config(dir.path());
        let result = run_reflect(&ReflectOptions::default(), &config, &crate::oracle::DisabledOracle);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_full_run_applies_deltas_and_marks_processed() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = test_config(dir.path());
        let session = session_file(dir.path(), "session.jsonl");

        let options = ReflectOptions {
            sessions: vec![session.clone()],
            ..ReflectOptions::default()
        };
        let report = run_reflect(&options, &config, &AddingOracle).unwrap();

        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.applied, 1);
        assert!(report.degraded.is_some());

        let paths = MemoryPaths::from_config(&config);
        let playbook = PlaybookStore::new(&paths.playbook).load().unwrap();
        assert_eq!(playbook.bullets.len(), 1);
        assert_eq!(playbook.metadata.total_reflections, 1);
        assert!(playbook.metadata.last_reflection.is_some());

        let processed: Vec<ProcessedEntry> = read_jsonl(&paths.processed_log()).unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].session_path, session.to_string_lossy());

        // A diary landed on disk.
        let diaries = DiaryStore::new(&paths.diary_dir).list().unwrap();
        assert_eq!(diaries.len(), 1);
        assert_eq!(diaries[0].status, SessionStatus::Success);
    }

    #[test]
    fn test_second_run_skips_processed_session() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = test_config(dir.path());
        let session = session_file(dir.path(), "session.jsonl");

        let options = ReflectOptions {
            sessions: vec![session],
            ..ReflectOptions::default()
        };
        run_reflect(&options, &config, &AddingOracle).unwrap();
        let second = run_reflect(&options, &config, &AddingOracle).unwrap();

        assert_eq!(second.already_processed, 1);
        assert!(second.sessions.is_empty());

        let paths = MemoryPaths::from_config(&config);
        let playbook = PlaybookStore::new(&paths.playbook).load().unwrap();
        // Still exactly one bullet.
        assert_eq!(playbook.bullets.len(), 1);
    }

    #[test]
    fn test_dry_run_leaves_playbook_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = test_config(dir.path());
        let session = session_file(dir.path(), "session.jsonl");

        let options = ReflectOptions {
            sessions: vec![session],
            dry_run: true,
            ..ReflectOptions::default()
        };
        let report = run_reflect(&options, &config, &AddingOracle).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.sessions.len(), 1);

        let paths = MemoryPaths::from_config(&config);
        assert!(PlaybookStore::new(&paths.playbook).load().unwrap().bullets.is_empty());
        let processed: Vec<ProcessedEntry> = read_jsonl(&paths.processed_log()).unwrap();
        assert!(processed.is_empty());
    }

    #[test]
    fn test_disabled_oracle_still_marks_sessions() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = test_config(dir.path());
        let session = session_file(dir.path(), "session.jsonl");

        let options = ReflectOptions {
            sessions: vec![session],
            ..ReflectOptions::default()
        };
        let report = run_reflect(&options, &config, &crate::oracle::DisabledOracle).unwrap();

        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.applied, 0);

        let paths = MemoryPaths::from_config(&config);
        let processed: Vec<ProcessedEntry> = read_jsonl(&paths.processed_log()).unwrap();
        assert_eq!(processed.len(), 1);
    }
}
