//! CLI command handlers.
//!
//! Each handler returns the envelope payload for json mode; human-readable
//! output goes straight to stdout when json mode is off.

use cass_memory::config::MemoryConfig;
use cass_memory::context::{assemble_context, ContextOptions};
use cass_memory::curation::prune;
use cass_memory::guard;
use cass_memory::models::{Maturity, Outcome, OutcomeRecord};
use cass_memory::oracle;
use cass_memory::reflection::pipeline::{run_reflect, ReflectOptions};
use cass_memory::scoring::{is_stale, score_distribution};
use cass_memory::storage::jsonl::append_jsonl;
use cass_memory::storage::paths::MemoryPaths;
use cass_memory::storage::playbook::{load_merged, PlaybookStore};
use cass_memory::{Error, Result};
use chrono::Utc;
use std::path::PathBuf;

/// Runs the reflect pipeline over the given sessions.
pub fn cmd_reflect(
    config: &MemoryConfig,
    sessions: Vec<PathBuf>,
    days: Option<u32>,
    dry_run: bool,
    json: bool,
) -> Result<serde_json::Value> {
    let oracle = oracle::from_config(config)?;
    let options = ReflectOptions {
        sessions,
        days,
        dry_run,
    };
    let report = run_reflect(&options, config, oracle.as_ref())?;

    if !json {
        for session in &report.sessions {
            println!(
                "reflected {} -> {} deltas ({} rejected by evidence)",
                session.session_path, session.deltas_generated, session.rejected_by_gate
            );
        }
        if report.already_processed > 0 {
            println!("{} session(s) already processed", report.already_processed);
        }
        if report.dry_run {
            println!("dry run: playbook untouched");
        } else {
            println!(
                "applied {} delta(s), skipped {}, {} inversion(s)",
                report.applied, report.skipped, report.inversions
            );
        }
        if let Some(message) = &report.degraded {
            println!("note: {message}");
        }
    }

    serde_json::to_value(&report).map_err(|e| Error::parse("reflect report", e))
}

/// Assembles context for a task.
pub fn cmd_context(
    config: &MemoryConfig,
    task: &str,
    workspace: Option<String>,
    days: Option<u32>,
    no_history: bool,
    json: bool,
) -> Result<serde_json::Value> {
    if task.trim().is_empty() {
        return Err(Error::Validation("task must not be empty".to_string()));
    }

    let options = ContextOptions {
        workspace,
        days,
        include_history: !no_history,
        max_bullets: None,
        max_history: None,
    };
    let context = assemble_context(task, &options, config)?;

    if !json {
        if context.relevant_bullets.is_empty() {
            println!("no matching rules");
        }
        for bullet in &context.relevant_bullets {
            println!("[{:.2}] {} ({})", bullet.relevance, bullet.content, bullet.category);
        }
        for anti in &context.anti_patterns {
            println!("[anti] {}", anti.content);
        }
        for warning in &context.deprecated_warnings {
            println!("[deprecated] {warning}");
        }
        for snippet in &context.history_snippets {
            println!("[history] {}: {}", snippet.source_path, snippet.snippet);
        }
    }

    serde_json::to_value(&context).map_err(|e| Error::parse("context", e))
}

/// Checks a command against the trauma list.
pub fn cmd_guard(config: &MemoryConfig, command: &str, json: bool) -> Result<serde_json::Value> {
    if command.trim().is_empty() {
        return Err(Error::Validation("command must not be empty".to_string()));
    }

    let paths = MemoryPaths::from_config(config);
    let decision = guard::check(command, &paths);

    if !json {
        match &decision {
            guard::GuardDecision::Allow => println!("allow"),
            guard::GuardDecision::Deny { reason, .. } => println!("deny: {reason}"),
        }
    }

    serde_json::to_value(&decision).map_err(|e| Error::parse("guard decision", e))
}

/// Records a session outcome.
#[allow(clippy::too_many_arguments)]
pub fn cmd_outcome(
    config: &MemoryConfig,
    session_id: &str,
    outcome: &str,
    rules: Vec<String>,
    duration_sec: Option<u64>,
    error_count: Option<u32>,
    notes: Option<String>,
    path: Option<String>,
    json: bool,
) -> Result<serde_json::Value> {
    let record = OutcomeRecord {
        session_id: session_id.to_string(),
        outcome: Outcome::parse(outcome)?,
        rules_used: rules,
        duration_sec,
        error_count,
        had_retries: None,
        sentiment: None,
        notes,
        recorded_at: Utc::now(),
        path: path.unwrap_or_default(),
    };

    let paths = MemoryPaths::from_config(config);
    paths.ensure_layout()?;
    append_jsonl(&paths.outcomes(), &record)?;

    if !json {
        println!("recorded {} as {}", record.session_id, record.outcome.as_str());
    }
    serde_json::to_value(&record).map_err(|e| Error::parse("outcome record", e))
}

/// Shows playbook statistics.
pub fn cmd_status(config: &MemoryConfig, json: bool) -> Result<serde_json::Value> {
    let paths = MemoryPaths::from_config(config);
    let playbook = load_merged(&paths)?;
    let now = Utc::now();

    let live = playbook.bullets.iter().filter(|b| b.is_live()).count();
    let retired = playbook.bullets.len() - live;
    let mut by_maturity = [0_usize; 4];
    for bullet in playbook.bullets.iter().filter(|b| b.is_live()) {
        let index = match bullet.maturity {
            Maturity::Candidate => 0,
            Maturity::Established => 1,
            Maturity::Proven => 2,
            Maturity::Deprecated => 3,
        };
        by_maturity[index] += 1;
    }
    let stale = playbook
        .bullets
        .iter()
        .filter(|b| b.is_live() && is_stale(b, config.scoring.stale_after_days, now))
        .count();
    let distribution = score_distribution(&playbook, &config.scoring, now);

    if !json {
        println!("bullets: {live} live, {retired} retired, {stale} stale");
        println!(
            "maturity: {} candidate, {} established, {} proven",
            by_maturity[0], by_maturity[1], by_maturity[2]
        );
        println!(
            "scores: {} excellent, {} good, {} neutral, {} at risk",
            distribution.excellent, distribution.good, distribution.neutral, distribution.at_risk
        );
        println!("reflections: {}", playbook.metadata.total_reflections);
    }

    Ok(serde_json::json!({
        "liveBullets": live,
        "retiredBullets": retired,
        "staleBullets": stale,
        "maturity": {
            "candidate": by_maturity[0],
            "established": by_maturity[1],
            "proven": by_maturity[2],
        },
        "distribution": distribution,
        "totalReflections": playbook.metadata.total_reflections,
        "lastReflection": playbook.metadata.last_reflection,
    }))
}

/// Prunes tombstones and stale candidates from the global playbook.
pub fn cmd_prune(config: &MemoryConfig, dry_run: bool, json: bool) -> Result<serde_json::Value> {
    let paths = MemoryPaths::from_config(config);
    let store = PlaybookStore::new(&paths.playbook);
    let now = Utc::now();

    let outcome = if dry_run {
        let mut copy = store.load()?;
        prune(&mut copy, config, now)
    } else {
        store.update("prune", |playbook| Ok(prune(playbook, config, now)))?
    };

    if !json {
        println!(
            "{}removed {} retired, {} stale",
            if dry_run { "(dry run) would have " } else { "" },
            outcome.removed_retired,
            outcome.removed_stale
        );
    }
    serde_json::to_value(outcome).map_err(|e| Error::parse("prune outcome", e))
}
