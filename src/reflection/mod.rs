//! Reflection: bounded iterative extraction of playbook deltas from a diary.
//!
//! Each iteration hands the oracle the compact playbook, the diary, related
//! history snippets, and the hashes of deltas already gathered. The loop
//! stops early when an iteration yields nothing new, when [`MAX_DELTAS`] is
//! reached, or on the final allowed iteration. Oracle failure is never fatal:
//! the deltas gathered so far are returned.

pub mod pipeline;

use crate::config::MemoryConfig;
use crate::history::HistoryHit;
use crate::models::{DiaryEntry, Playbook, PlaybookDelta};
use crate::oracle::Oracle;
use serde::Deserialize;
use std::collections::HashSet;

/// Hard cap on deltas gathered in one reflection.
pub const MAX_DELTAS: usize = 20;
/// How many history snippets the prompt carries.
pub const MAX_HISTORY_SNIPPETS: usize = 5;
/// Character cap per history snippet.
pub const SNIPPET_LIMIT: usize = 200;

/// Result of one reflection run.
#[derive(Debug)]
pub struct ReflectionOutcome {
    /// Deduplicated deltas, in oracle order.
    pub deltas: Vec<PlaybookDelta>,
    /// Iterations actually executed.
    pub iterations: u32,
    /// Whether the loop ended on an oracle failure.
    pub oracle_failed: bool,
}

/// JSON schema handed to the oracle for delta extraction.
#[must_use]
pub fn delta_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["deltas"],
        "properties": {
            "deltas": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["type"],
                    "properties": {
                        "type": {
                            "enum": ["add", "replace", "merge", "deprecate", "helpful", "harmful"]
                        },
                        "bullet": {
                            "type": "object",
                            "properties": {
                                "content": {"type": "string"},
                                "category": {"type": "string"},
                                "scope": {"enum": ["global", "workspace"]},
                                "kind": {"type": "string"},
                                "isNegative": {"type": "boolean"}
                            }
                        },
                        "bulletId": {"type": "string"},
                        "bulletIds": {"type": "array", "items": {"type": "string"}},
                        "newContent": {"type": "string"},
                        "mergedContent": {"type": "string"},
                        "replacedBy": {"type": "string"},
                        "sourceSession": {"type": "string"},
                        "reason": {"type": "string"}
                    }
                }
            }
        }
    })
}

/// Formats the playbook compactly: grouped by category, one glyphed line per
/// live bullet with its feedback counts.
#[must_use]
pub fn format_playbook_compact(playbook: &Playbook) -> String {
    let mut categories: Vec<&str> = playbook
        .bullets
        .iter()
        .filter(|b| b.is_live())
        .map(|b| b.category.as_str())
        .collect();
    categories.sort_unstable();
    categories.dedup();

    if categories.is_empty() {
        return "(playbook is empty)".to_string();
    }

    let mut out = String::new();
    for category in categories {
        let label = if category.is_empty() { "uncategorized" } else { category };
        out.push_str(&format!("## {label}\n"));
        for bullet in playbook
            .bullets
            .iter()
            .filter(|b| b.is_live() && b.category == category)
        {
            out.push_str(&format!(
                "{} [{}] {} (+{}/-{})\n",
                bullet.maturity.glyph(),
                bullet.id,
                bullet.content,
                bullet.helpful_count,
                bullet.harmful_count
            ));
        }
    }
    out
}

/// Formats a diary: overview line plus enumerated non-empty sections.
#[must_use]
pub fn format_diary(diary: &DiaryEntry) -> String {
    let mut out = format!(
        "Session {} by {} in {} [{}]\n",
        diary.session_path,
        if diary.agent.is_empty() { "unknown agent" } else { &diary.agent },
        if diary.workspace.is_empty() { "unknown workspace" } else { &diary.workspace },
        diary.status.as_str()
    );

    let sections: [(&str, &[String]); 5] = [
        ("Accomplishments", &diary.accomplishments),
        ("Decisions", &diary.decisions),
        ("Challenges", &diary.challenges),
        ("Preferences", &diary.preferences),
        ("Key learnings", &diary.key_learnings),
    ];
    for (title, items) in sections {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("{title}:\n"));
        for (index, item) in items.iter().enumerate() {
            out.push_str(&format!("  {}. {item}\n", index + 1));
        }
    }
    out
}

/// Formats up to [`MAX_HISTORY_SNIPPETS`] history hits, truncated to
/// [`SNIPPET_LIMIT`] characters each.
#[must_use]
pub fn format_history_snippets(hits: &[HistoryHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut out = String::from("Related history:\n");
    for hit in hits.iter().take(MAX_HISTORY_SNIPPETS) {
        out.push_str(&format!(
            "- {}: {}\n",
            hit.source_path,
            truncate(&hit.snippet, SNIPPET_LIMIT)
        ));
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn build_prompt(
    playbook_text: &str,
    diary_text: &str,
    history_text: &str,
    seen: &[String],
) -> String {
    let mut prompt = format!(
        "You maintain a playbook of durable rules for AI coding agents.\n\n\
         # Current playbook\n{playbook_text}\n\
         # Session diary\n{diary_text}\n"
    );
    if !history_text.is_empty() {
        prompt.push_str(&format!("# {history_text}\n"));
    }
    prompt.push_str(
        "\nPropose playbook deltas justified by this session: new rules worth keeping, \
         feedback on existing rules that helped or hurt, merges of redundant rules, and \
         deprecations of rules the session contradicted. Return {\"deltas\": [...]}. \
         Return an empty array when nothing new is warranted.\n",
    );
    if !seen.is_empty() {
        prompt.push_str(&format!(
            "\nAlready proposed (do not repeat): {}\n",
            seen.join("; ")
        ));
    }
    prompt
}

#[derive(Deserialize)]
struct DeltaBatch {
    #[serde(default)]
    deltas: Vec<PlaybookDelta>,
}

/// Runs the bounded reflection loop for one diary.
#[must_use]
pub fn reflect(
    oracle: &dyn Oracle,
    diary: &DiaryEntry,
    playbook: &Playbook,
    history: &[HistoryHit],
    config: &MemoryConfig,
) -> ReflectionOutcome {
    let playbook_text = format_playbook_compact(playbook);
    let diary_text = format_diary(diary);
    let history_text = format_history_snippets(history);
    let schema = delta_schema();

    let mut gathered: Vec<PlaybookDelta> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut seen_order: Vec<String> = Vec::new();
    let mut iterations = 0_u32;
    let mut oracle_failed = false;

    let max_iterations = config.max_reflector_iterations.max(1);
    for _ in 0..max_iterations {
        iterations += 1;
        let prompt = build_prompt(&playbook_text, &diary_text, &history_text, &seen_order);

        let response = match oracle.extract(&schema, &prompt) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, session = %diary.session_path, "oracle failed; keeping deltas gathered so far");
                oracle_failed = true;
                break;
            },
        };

        let batch: DeltaBatch = match serde_json::from_value(response) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, session = %diary.session_path, "oracle returned an invalid delta shape");
                oracle_failed = true;
                break;
            },
        };

        let mut new_count = 0;
        for mut delta in batch.deltas {
            delta.inject_source_session(&diary.session_path);
            let key = delta.hash_key();
            if seen.insert(key.clone()) {
                seen_order.push(key);
                gathered.push(delta);
                new_count += 1;
                if gathered.len() >= MAX_DELTAS {
                    break;
                }
            }
        }

        if new_count == 0 || gathered.len() >= MAX_DELTAS {
            break;
        }
    }

    ReflectionOutcome {
        deltas: gathered,
        iterations,
        oracle_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::{Error, Result};
    use chrono::Utc;
    use std::sync::Mutex;

    /// Deterministic oracle returning queued responses.
    struct StubOracle {
        responses: Mutex<Vec<Result<serde_json::Value>>>,
        calls: Mutex<u32>,
    }

    impl StubOracle {
        fn new(responses: Vec<Result<serde_json::Value>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl Oracle for StubOracle {
        fn name(&self) -> &'static str {
            "stub"
        }

        fn extract(&self, _schema: &serde_json::Value, _prompt: &str) -> Result<serde_json::Value> {
            *self.calls.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(serde_json::json!({"deltas": []}))
            } else {
                responses.remove(0)
            }
        }
    }

    fn diary() -> DiaryEntry {
        let mut entry = DiaryEntry::new("d-1", "/tmp/session.jsonl", Utc::now());
        entry.status = SessionStatus::Success;
        entry.key_learnings.push("Integration tests need isolated ports".to_string());
        entry
    }

    fn add_json(content: &str) -> serde_json::Value {
        serde_json::json!({
            "type": "add",
            "bullet": {"content": content, "category": "testing"},
            "reason": "observed"
        })
    }

    #[test]
    fn test_gathers_and_injects_source_session() {
        let oracle = StubOracle::new(vec![
            Ok(serde_json::json!({"deltas": [add_json("Use isolated ports in tests")]})),
            Ok(serde_json::json!({"deltas": []})),
        ]);
        let config = MemoryConfig::default();
        let outcome = reflect(&oracle, &diary(), &Playbook::new(Utc::now()), &[], &config);

        assert_eq!(outcome.deltas.len(), 1);
        assert_eq!(outcome.deltas[0].source_session(), Some("/tmp/session.jsonl"));
        assert!(!outcome.oracle_failed);
    }

    #[test]
    fn test_early_exit_on_no_new_deltas() {
        let repeated = serde_json::json!({"deltas": [add_json("Same rule")]});
        let oracle = StubOracle::new(vec![Ok(repeated.clone()), Ok(repeated.clone()), Ok(repeated)]);
        let config = MemoryConfig::default();
        let outcome = reflect(&oracle, &diary(), &Playbook::new(Utc::now()), &[], &config);

        // Second iteration produced nothing new, so the third never ran.
        assert_eq!(outcome.deltas.len(), 1);
        assert_eq!(oracle.calls(), 2);
    }

    #[test]
    fn test_caps_at_max_deltas() {
        let batch: Vec<serde_json::Value> =
            (0..30).map(|i| add_json(&format!("Rule number {i}"))).collect();
        let oracle = StubOracle::new(vec![Ok(serde_json::json!({"deltas": batch}))]);
        let config = MemoryConfig::default();
        let outcome = reflect(&oracle, &diary(), &Playbook::new(Utc::now()), &[], &config);

        assert_eq!(outcome.deltas.len(), MAX_DELTAS);
        assert_eq!(oracle.calls(), 1);
    }

    #[test]
    fn test_oracle_failure_returns_partial() {
        let oracle = StubOracle::new(vec![
            Ok(serde_json::json!({"deltas": [add_json("Keep this")]})),
            Err(Error::OracleFailure("boom".to_string())),
        ]);
        let config = MemoryConfig::default();
        let outcome = reflect(&oracle, &diary(), &Playbook::new(Utc::now()), &[], &config);

        assert_eq!(outcome.deltas.len(), 1);
        assert!(outcome.oracle_failed);
    }

    #[test]
    fn test_iteration_bound_respected() {
        let distinct = |i: u32| {
            Ok(serde_json::json!({"deltas": [add_json(&format!("Rule {i}"))]}))
        };
        let oracle = StubOracle::new((0_u32..10).map(distinct).collect());
        let config = MemoryConfig {
            max_reflector_iterations: 3,
            ..MemoryConfig::default()
        };
        let outcome = reflect(&oracle, &diary(), &Playbook::new(Utc::now()), &[], &config);

        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.deltas.len(), 3);
    }

    #[test]
    fn test_formatting_omits_empty_sections() {
        let entry = DiaryEntry::new("d-2", "/tmp/s.jsonl", Utc::now());
        let text = format_diary(&entry);
        assert!(!text.contains("Accomplishments"));
        assert!(!text.contains("Key learnings"));
    }

    #[test]
    fn test_snippet_truncation() {
        let long = "x".repeat(500);
        let hits = vec![HistoryHit {
            source_path: "s1".to_string(),
            line_number: 1,
            snippet: long.clone(),
            agent: String::new(),
            score: 1.0,
            timestamp: None,
        }];
        let text = format_history_snippets(&hits);
        assert!(text.contains("..."));
        assert!(text.len() < long.len());
    }
}
