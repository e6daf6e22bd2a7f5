//! Validation gates for candidate rules.
//!
//! The evidence gate checks a proposed rule against recorded history: enough
//! sessions ending in failure kill the candidate, enough successes accept it
//! outright, anything else lands it in draft. Verdict normalization maps the
//! oracle's review verdicts onto the accept/caution/reject triple.

use crate::config::MemoryConfig;
use crate::history::{HistorySearch, SearchOptions};
use crate::keywords::extract_keywords;
use crate::models::BulletState;
use std::collections::HashMap;

/// Markers that count a session as a success.
const SUCCESS_MARKERS: [&str; 5] = ["fixed", "solved", "resolved", "works", "working"];
/// Markers that count a session as a failure.
const FAILURE_MARKERS: [&str; 4] = ["failed", "crashed", "doesn't work", "error"];
/// Hits requested from the history tool per gate check.
const GATE_SEARCH_LIMIT: usize = 25;

/// Outcome of an evidence gate check.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceReport {
    /// Whether the candidate may enter the playbook.
    pub passed: bool,
    /// State the candidate should start in, when it passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_state: Option<BulletState>,
    /// Unique sessions the keywords matched.
    pub session_count: usize,
    /// Sessions carrying a success marker.
    pub success_count: usize,
    /// Sessions carrying a failure marker.
    pub failure_count: usize,
    /// Human-readable decision.
    pub reason: String,
}

/// Verifies a proposed rule against recorded history.
#[must_use]
pub fn evidence_count_gate(
    candidate: &str,
    config: &MemoryConfig,
    history: &dyn HistorySearch,
) -> EvidenceReport {
    let keywords = extract_keywords(candidate);
    if keywords.is_empty() {
        return EvidenceReport {
            passed: true,
            suggested_state: Some(BulletState::Draft),
            session_count: 0,
            success_count: 0,
            failure_count: 0,
            reason: "No meaningful keywords".to_string(),
        };
    }

    let options = SearchOptions {
        limit: GATE_SEARCH_LIMIT,
        days: Some(config.session_lookback_days.max(1) * 3),
        ..SearchOptions::default()
    };
    let hits = match history.search(&keywords.join(" "), &options) {
        Ok(hits) => hits,
        Err(e) => {
            tracing::debug!(error = %e, "evidence gate degraded: history unavailable");
            return EvidenceReport {
                passed: true,
                suggested_state: Some(BulletState::Draft),
                session_count: 0,
                success_count: 0,
                failure_count: 0,
                reason: "History unavailable; accepting as draft".to_string(),
            };
        },
    };

    // Unique sessions, not raw hits.
    let mut sessions: HashMap<&str, Vec<&str>> = HashMap::new();
    for hit in &hits {
        sessions
            .entry(hit.source_path.as_str())
            .or_default()
            .push(hit.snippet.as_str());
    }

    let mut success_count = 0;
    let mut failure_count = 0;
    for snippets in sessions.values() {
        if snippets.iter().any(|s| has_success_marker(s)) {
            success_count += 1;
        }
        if snippets.iter().any(|s| has_failure_marker(s)) {
            failure_count += 1;
        }
    }

    let session_count = sessions.len();
    if failure_count >= 2 {
        EvidenceReport {
            passed: false,
            suggested_state: None,
            session_count,
            success_count,
            failure_count,
            reason: "Strong failure signal".to_string(),
        }
    } else if success_count >= 5 {
        EvidenceReport {
            passed: true,
            suggested_state: Some(BulletState::Active),
            session_count,
            success_count,
            failure_count,
            reason: "Auto-accepting".to_string(),
        }
    } else {
        EvidenceReport {
            passed: true,
            suggested_state: Some(BulletState::Draft),
            session_count,
            success_count,
            failure_count,
            reason: format!(
                "Evidence ambiguous ({success_count} success, {failure_count} failure)"
            ),
        }
    }
}

fn has_success_marker(snippet: &str) -> bool {
    let lower = snippet.to_lowercase();
    SUCCESS_MARKERS.iter().any(|marker| {
        if *marker == "fixed" {
            // "fixed-width" is typography, not triumph.
            lower.replace("fixed-width", "").contains("fixed")
        } else {
            lower.contains(marker)
        }
    })
}

fn has_failure_marker(snippet: &str) -> bool {
    let lower = snippet.to_lowercase();
    FAILURE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Validator verdict after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVerdict {
    /// Whether the rule survives review.
    pub is_valid: bool,
    /// Normalized verdict label.
    pub verdict: String,
    /// Confidence after remapping.
    pub confidence: f64,
}

/// Maps an oracle review verdict onto the accept/caution/reject triple.
///
/// `ACCEPT` passes through; `REFINE` is remapped to `ACCEPT_WITH_CAUTION`
/// with confidence scaled by 0.8; `REJECT` stays invalid with its confidence
/// preserved. Unknown verdicts reject with zero confidence.
#[must_use]
pub fn normalize_validator_verdict(verdict: &str, confidence: f64) -> NormalizedVerdict {
    match verdict.trim().to_uppercase().as_str() {
        "ACCEPT" => NormalizedVerdict {
            is_valid: true,
            verdict: "ACCEPT".to_string(),
            confidence,
        },
        "REFINE" => NormalizedVerdict {
            is_valid: true,
            verdict: "ACCEPT_WITH_CAUTION".to_string(),
            confidence: confidence * 0.8,
        },
        "REJECT" => NormalizedVerdict {
            is_valid: false,
            verdict: "REJECT".to_string(),
            confidence,
        },
        other => {
            tracing::warn!(verdict = other, "unknown validator verdict; rejecting");
            NormalizedVerdict {
                is_valid: false,
                verdict: "REJECT".to_string(),
                confidence: 0.0,
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryHit;
    use crate::Result;

    struct StubHistory {
        hits: Vec<HistoryHit>,
    }

    impl StubHistory {
        fn with_snippets(snippets: &[(&str, &str)]) -> Self {
            Self {
                hits: snippets
                    .iter()
                    .map(|(path, snippet)| HistoryHit {
                        source_path: (*path).to_string(),
                        line_number: 1,
                        snippet: (*snippet).to_string(),
                        agent: String::new(),
                        score: 1.0,
                        timestamp: None,
                    })
                    .collect(),
            }
        }
    }

    impl HistorySearch for StubHistory {
        fn search(&self, _query: &str, _options: &SearchOptions) -> Result<Vec<HistoryHit>> {
            Ok(self.hits.clone())
        }
    }

    struct FailingHistory;

    impl HistorySearch for FailingHistory {
        fn search(&self, _query: &str, _options: &SearchOptions) -> Result<Vec<HistoryHit>> {
            Err(crate::Error::ToolUnavailable("gone".to_string()))
        }
    }

    #[test]
    fn test_strong_failure_signal_rejects() {
        let history = StubHistory::with_snippets(&[
            ("s1", "failed to compile"),
            ("s2", "crashed with error"),
            ("s3", "doesn't work"),
        ]);
        let report =
            evidence_count_gate("Always use var for everything", &MemoryConfig::default(), &history);

        assert!(!report.passed);
        assert_eq!(report.session_count, 3);
        assert_eq!(report.failure_count, 3);
        assert_eq!(report.reason, "Strong failure signal");
    }

    #[test]
    fn test_five_successes_auto_accept() {
        let history = StubHistory::with_snippets(&[
            ("s1", "finally fixed the race"),
            ("s2", "solved by pinning the version"),
            ("s3", "now it works"),
            ("s4", "resolved after the retry change"),
            ("s5", "working as expected"),
        ]);
        let report =
            evidence_count_gate("Pin the version before retrying", &MemoryConfig::default(), &history);

        assert!(report.passed);
        assert_eq!(report.success_count, 5);
        assert_eq!(report.suggested_state, Some(BulletState::Active));
        assert_eq!(report.reason, "Auto-accepting");
    }

    #[test]
    fn test_unique_sessions_not_raw_hits() {
        // Five success hits, but only two unique sessions.
        let history = StubHistory::with_snippets(&[
            ("s1", "fixed it"),
            ("s1", "fixed again"),
            ("s1", "works"),
            ("s2", "solved"),
            ("s2", "working"),
        ]);
        let report = evidence_count_gate("retry logic backoff", &MemoryConfig::default(), &history);

        assert_eq!(report.session_count, 2);
        assert_eq!(report.success_count, 2);
        assert_eq!(report.suggested_state, Some(BulletState::Draft));
    }

    #[test]
    fn test_fixed_width_is_not_a_success() {
        let history = StubHistory::with_snippets(&[("s1", "rendered in a fixed-width font")]);
        let report = evidence_count_gate("terminal font rendering", &MemoryConfig::default(), &history);
        assert_eq!(report.success_count, 0);
    }

    #[test]
    fn test_no_meaningful_keywords_passes_as_draft() {
        let report = evidence_count_gate(
            "use the and for",
            &MemoryConfig::default(),
            &StubHistory::with_snippets(&[]),
        );
        assert!(report.passed);
        assert_eq!(report.suggested_state, Some(BulletState::Draft));
        assert_eq!(report.reason, "No meaningful keywords");
    }

    #[test]
    fn test_history_failure_degrades_to_draft() {
        let report =
            evidence_count_gate("cache invalidation strategy", &MemoryConfig::default(), &FailingHistory);
        assert!(report.passed);
        assert_eq!(report.suggested_state, Some(BulletState::Draft));
    }

    #[test]
    fn test_verdict_normalization() {
        let accept = normalize_validator_verdict("ACCEPT", 0.9);
        assert!(accept.is_valid);
        assert!((accept.confidence - 0.9).abs() < f64::EPSILON);

        let refine = normalize_validator_verdict("refine", 0.9);
        assert!(refine.is_valid);
        assert_eq!(refine.verdict, "ACCEPT_WITH_CAUTION");
        assert!((refine.confidence - 0.72).abs() < 1e-9);

        let reject = normalize_validator_verdict("REJECT", 0.6);
        assert!(!reject.is_valid);
        assert!((reject.confidence - 0.6).abs() < f64::EPSILON);

        assert!(!normalize_validator_verdict("SHRUG", 0.5).is_valid);
    }
}
