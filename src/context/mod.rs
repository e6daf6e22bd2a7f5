//! Context assembly: the rules and history an agent should see for a task.

use crate::config::MemoryConfig;
use crate::history::{CassAdapter, HistoryHit, HistorySearch, SearchOptions};
use crate::keywords::extract_keywords;
use crate::models::{Playbook, PlaybookBullet};
use crate::scoring::effective_score;
use crate::storage::paths::MemoryPaths;
use crate::storage::playbook::load_merged;
use crate::Result;
use chrono::Utc;
use serde::Serialize;

/// Character cap for history snippets in assembled context.
const SNIPPET_LIMIT: usize = 200;

/// Options for a context query.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Restrict history to one workspace.
    pub workspace: Option<String>,
    /// Restrict history to the last N days.
    pub days: Option<u32>,
    /// Whether to query the history tool at all.
    pub include_history: bool,
    /// Override for the bullet cap.
    pub max_bullets: Option<usize>,
    /// Override for the history cap.
    pub max_history: Option<usize>,
}

/// A bullet with its relevance to the task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedBullet {
    /// Bullet id.
    pub id: String,
    /// Rule text.
    pub content: String,
    /// Taxonomy tag.
    pub category: String,
    /// Confidence tier.
    pub maturity: crate::models::Maturity,
    /// Relevance to the task.
    pub relevance: f64,
}

/// Assembled context for one task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    /// The task the context was assembled for.
    pub task: String,
    /// Ranked positive rules.
    pub relevant_bullets: Vec<RankedBullet>,
    /// Ranked anti-patterns, surfaced separately.
    pub anti_patterns: Vec<RankedBullet>,
    /// Related history snippets.
    pub history_snippets: Vec<HistorySnippet>,
    /// Warnings about deprecated patterns the task touches.
    pub deprecated_warnings: Vec<String>,
    /// Follow-up queries worth running against history.
    pub suggested_queries: Vec<String>,
}

/// A truncated history hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnippet {
    /// Session the snippet came from.
    pub source_path: String,
    /// The snippet text, truncated.
    pub snippet: String,
    /// Agent that produced the session.
    pub agent: String,
}

/// Loads the merged playbook and assembles context for `task`.
///
/// A playbook that fails schema validation degrades to an empty rule set
/// rather than aborting; a playbook that cannot be parsed at all is an error.
///
/// # Errors
///
/// Returns [`crate::Error::Parse`] when the playbook file is unreadable as YAML.
pub fn assemble_context(
    task: &str,
    options: &ContextOptions,
    config: &MemoryConfig,
) -> Result<TaskContext> {
    let paths = MemoryPaths::from_config(config);
    // An unparseable playbook aborts; a schema violation degrades to an
    // empty rule set so context queries keep working.
    let playbook = load_merged(&paths)?;
    let playbook = match playbook.validate() {
        Ok(()) => playbook,
        Err(e) => {
            tracing::warn!(error = %e, "playbook failed validation; assembling context without rules");
            Playbook::new(Utc::now())
        },
    };

    let adapter = CassAdapter::new(config.cass_path.clone());
    let history: Option<&dyn HistorySearch> = if options.include_history && adapter.available() {
        Some(&adapter)
    } else {
        None
    };

    Ok(assemble_from_parts(task, options, config, &playbook, history))
}

/// Assembles context from an already-loaded playbook.
#[must_use]
pub fn assemble_from_parts(
    task: &str,
    options: &ContextOptions,
    config: &MemoryConfig,
    playbook: &Playbook,
    history: Option<&dyn HistorySearch>,
) -> TaskContext {
    let now = Utc::now();
    let keywords = extract_keywords(task);

    let mut positive = Vec::new();
    let mut negative = Vec::new();
    for bullet in playbook.bullets.iter().filter(|b| b.is_live()) {
        let Some(relevance) = relevance(bullet, &keywords, config, now) else {
            continue;
        };
        let ranked = RankedBullet {
            id: bullet.id.clone(),
            content: bullet.content.clone(),
            category: bullet.category.clone(),
            maturity: bullet.maturity,
            relevance,
        };
        if bullet.is_negative {
            negative.push(ranked);
        } else {
            positive.push(ranked);
        }
    }

    let by_relevance =
        |a: &RankedBullet, b: &RankedBullet| b.relevance.total_cmp(&a.relevance);
    positive.sort_by(by_relevance);
    negative.sort_by(by_relevance);

    let max_bullets = options.max_bullets.unwrap_or(config.max_bullets_in_context);
    positive.truncate(max_bullets);
    negative.truncate(max_bullets);

    let history_snippets = history
        .map(|tool| query_history(tool, &keywords, options, config))
        .unwrap_or_default();

    TaskContext {
        task: task.to_string(),
        relevant_bullets: positive,
        anti_patterns: negative,
        history_snippets,
        deprecated_warnings: deprecated_warnings(playbook, &keywords),
        suggested_queries: suggested_queries(&keywords),
    }
}

/// Keyword-overlap relevance weighted by effective score, with a small boost
/// for a category match. `None` when nothing overlaps.
fn relevance(
    bullet: &PlaybookBullet,
    keywords: &[String],
    config: &MemoryConfig,
    now: chrono::DateTime<Utc>,
) -> Option<f64> {
    if keywords.is_empty() {
        return None;
    }

    let content = bullet.content.to_lowercase();
    let tags: Vec<String> = bullet.tags.iter().map(|t| t.to_lowercase()).collect();
    let overlap = keywords
        .iter()
        .filter(|k| content.contains(k.as_str()) || tags.iter().any(|t| t.contains(k.as_str())))
        .count();
    if overlap == 0 {
        return None;
    }

    let category = bullet.category.to_lowercase();
    let category_boost = if keywords.iter().any(|k| category.contains(k.as_str())) {
        0.5
    } else {
        0.0
    };

    let score = effective_score(bullet, &config.scoring, now);
    Some((overlap as f64 + category_boost) * (1.0 + score / 10.0))
}

fn query_history(
    tool: &dyn HistorySearch,
    keywords: &[String],
    options: &ContextOptions,
    config: &MemoryConfig,
) -> Vec<HistorySnippet> {
    if keywords.is_empty() {
        return Vec::new();
    }

    let search_options = SearchOptions {
        limit: options.max_history.unwrap_or(config.max_history_in_context),
        days: options.days,
        workspace: options.workspace.clone(),
        ..SearchOptions::default()
    };

    match tool.search(&keywords.join(" "), &search_options) {
        Ok(hits) => hits.into_iter().map(to_snippet).collect(),
        Err(e) => {
            tracing::debug!(error = %e, "context history query degraded to empty");
            Vec::new()
        },
    }
}

fn to_snippet(hit: HistoryHit) -> HistorySnippet {
    HistorySnippet {
        snippet: truncate(&hit.snippet, SNIPPET_LIMIT),
        source_path: hit.source_path,
        agent: hit.agent,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn deprecated_warnings(playbook: &Playbook, keywords: &[String]) -> Vec<String> {
    playbook
        .deprecated_patterns
        .iter()
        .filter(|entry| {
            let pattern = entry.pattern.to_lowercase();
            keywords.iter().any(|k| pattern.contains(k.as_str()))
        })
        .map(|entry| match &entry.replacement {
            Some(replacement) => format!(
                "'{}' is deprecated ({}); use '{replacement}'",
                entry.pattern, entry.reason
            ),
            None => format!("'{}' is deprecated ({})", entry.pattern, entry.reason),
        })
        .collect()
}

fn suggested_queries(keywords: &[String]) -> Vec<String> {
    let mut queries = Vec::new();
    if keywords.is_empty() {
        return queries;
    }
    queries.push(keywords.join(" "));
    if keywords.len() > 2 {
        queries.push(keywords[..2].join(" "));
    }
    queries.push(format!("{} error", keywords[0]));
    queries
}
