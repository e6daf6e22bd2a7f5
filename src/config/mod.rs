//! Configuration management.
//!
//! Global config lives at `~/.cass-memory/config.json` (JSON); a repository
//! may overlay it with `.cass/config.json` or `.cass/config.yaml` (JSON wins
//! when both exist). Security-sensitive path keys are only honored from the
//! global tier.

use crate::storage::paths::find_repo_root;
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Effective scoring parameters.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Half-life in days for feedback decay.
    pub decay_half_life_days: f64,
    /// Weight applied to decayed harmful counts.
    pub harmful_multiplier: f64,
    /// Decayed helpful needed for candidate → established.
    pub maturity_promotion_threshold: f64,
    /// Decayed helpful needed for established → proven.
    pub maturity_proven_threshold: f64,
    /// Maximum harmful ratio tolerated for proven.
    pub max_harmful_ratio_for_proven: f64,
    /// Decayed harmful at which a bullet is auto-deprecated and inverted.
    pub prune_harmful_threshold: f64,
    /// Feedback events needed before a draft bullet goes active.
    pub min_feedback_for_active: u32,
    /// Days without feedback after which a bullet counts as stale.
    pub stale_after_days: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            decay_half_life_days: 90.0,
            harmful_multiplier: 4.0,
            maturity_promotion_threshold: 3.0,
            maturity_proven_threshold: 10.0,
            max_harmful_ratio_for_proven: 0.1,
            prune_harmful_threshold: 3.0,
            min_feedback_for_active: 1,
            stale_after_days: 90.0,
        }
    }
}

/// Sanitization settings.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether transcript scrubbing runs at all.
    pub enabled: bool,
    /// User-supplied `(pattern, replacement)` pairs applied after the defaults.
    pub extra_patterns: Vec<ExtraPattern>,
    /// Path of the sanitization audit log, when auditing is on.
    pub audit_log: Option<PathBuf>,
    /// Audit verbosity (`none`, `summary`, `full`).
    pub audit_level: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            extra_patterns: Vec::new(),
            audit_log: None,
            audit_level: "summary".to_string(),
        }
    }
}

/// One user-configured scrub rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraPattern {
    /// Regex to match.
    pub pattern: String,
    /// Replacement text.
    pub replacement: String,
}

/// Cross-agent sharing settings.
#[derive(Debug, Clone, Default)]
pub struct CrossAgentConfig {
    /// Whether cross-agent surfacing is on.
    pub enabled: bool,
    /// Whether the user consented to sharing.
    pub consent_given: bool,
    /// When consent was given.
    pub consent_date: Option<String>,
    /// Agents allowed to read this memory.
    pub agents: Vec<String>,
    /// Path of the cross-agent audit log.
    pub audit_log: Option<PathBuf>,
}

/// Reflection spend limits.
#[derive(Debug, Clone, Default)]
pub struct BudgetConfig {
    /// Cap on oracle calls in a single run.
    pub max_oracle_calls_per_run: Option<u32>,
    /// Cap on sessions processed in a single run.
    pub max_sessions_per_run: Option<u32>,
}

/// Runtime configuration for cass-memory.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Oracle provider name (`anthropic`, `none`).
    pub provider: String,
    /// Oracle model override.
    pub model: Option<String>,
    /// Oracle API key.
    pub api_key: Option<SecretString>,
    /// Path to the `cass` history indexer binary.
    pub cass_path: Option<PathBuf>,
    /// Global memory root (`~/.cass-memory`).
    pub home: PathBuf,
    /// Working directory for repo-overlay discovery.
    pub cwd: PathBuf,
    /// Global playbook path override.
    pub playbook_path: Option<PathBuf>,
    /// Diary directory override.
    pub diary_dir: Option<PathBuf>,
    /// Maximum bullets returned by the context assembler.
    pub max_bullets_in_context: usize,
    /// Maximum history snippets returned by the context assembler.
    pub max_history_in_context: usize,
    /// How many days back session discovery looks.
    pub session_lookback_days: u32,
    /// Upper bound on reflection iterations per diary.
    pub max_reflector_iterations: u32,
    /// Emit JSON envelopes instead of human output.
    pub json_output: bool,
    /// Verbose logging.
    pub verbose: bool,
    /// Transcript scrubbing settings.
    pub sanitization: SanitizationConfig,
    /// Cross-agent settings.
    pub cross_agent: CrossAgentConfig,
    /// Scoring parameters.
    pub scoring: ScoringConfig,
    /// Spend limits.
    pub budget: BudgetConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: None,
            api_key: None,
            cass_path: None,
            home: default_home(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            playbook_path: None,
            diary_dir: None,
            max_bullets_in_context: 10,
            max_history_in_context: 10,
            session_lookback_days: 30,
            max_reflector_iterations: 3,
            json_output: false,
            verbose: false,
            sanitization: SanitizationConfig::default(),
            cross_agent: CrossAgentConfig::default(),
            scoring: ScoringConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}

fn default_home() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        if !home.trim().is_empty() {
            return PathBuf::from(home).join(".cass-memory");
        }
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".cass-memory"))
        .unwrap_or_else(|| PathBuf::from(".cass-memory"))
}

/// Configuration file structure (JSON globally, JSON or YAML in the overlay).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Oracle provider name.
    pub provider: Option<String>,
    /// Oracle model.
    pub model: Option<String>,
    /// Oracle API key.
    #[serde(alias = "api_key")]
    pub api_key: Option<String>,
    /// `cass` binary path.
    #[serde(alias = "cass_path")]
    pub cass_path: Option<String>,
    /// Global memory root.
    pub home: Option<String>,
    /// Working directory override.
    pub cwd: Option<String>,
    /// Global playbook path override.
    #[serde(alias = "playbook_path")]
    pub playbook_path: Option<String>,
    /// Diary directory override.
    #[serde(alias = "diary_dir")]
    pub diary_dir: Option<String>,
    /// Context bullet cap.
    #[serde(alias = "max_bullets_in_context")]
    pub max_bullets_in_context: Option<usize>,
    /// Context history cap.
    #[serde(alias = "max_history_in_context")]
    pub max_history_in_context: Option<usize>,
    /// Session discovery window.
    #[serde(alias = "session_lookback_days")]
    pub session_lookback_days: Option<u32>,
    /// Harmful threshold for pruning/inversion.
    #[serde(alias = "prune_harmful_threshold")]
    pub prune_harmful_threshold: Option<f64>,
    /// Decay half-life in days.
    #[serde(alias = "decay_half_life_days")]
    pub decay_half_life_days: Option<f64>,
    /// Promotion threshold.
    #[serde(alias = "maturity_promotion_threshold")]
    pub maturity_promotion_threshold: Option<f64>,
    /// Proven threshold.
    #[serde(alias = "maturity_proven_threshold")]
    pub maturity_proven_threshold: Option<f64>,
    /// Harmful weight.
    #[serde(alias = "harmful_multiplier")]
    pub harmful_multiplier: Option<f64>,
    /// Reflection iteration cap.
    #[serde(alias = "max_reflector_iterations")]
    pub max_reflector_iterations: Option<u32>,
    /// JSON output flag.
    #[serde(alias = "json_output")]
    pub json_output: Option<bool>,
    /// Verbose flag.
    pub verbose: Option<bool>,
    /// Sanitization section.
    pub sanitization: Option<ConfigFileSanitization>,
    /// Cross-agent section.
    #[serde(alias = "cross_agent")]
    pub cross_agent: Option<ConfigFileCrossAgent>,
    /// Scoring section (wins over the top-level scoring keys).
    pub scoring: Option<ConfigFileScoring>,
    /// Budget section.
    pub budget: Option<ConfigFileBudget>,
}

/// Sanitization section of a config file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFileSanitization {
    /// Whether scrubbing is enabled.
    pub enabled: Option<bool>,
    /// Extra scrub rules.
    #[serde(alias = "extra_patterns")]
    pub extra_patterns: Option<Vec<ExtraPattern>>,
    /// Audit log path.
    #[serde(alias = "audit_log")]
    pub audit_log: Option<String>,
    /// Audit verbosity.
    #[serde(alias = "audit_level")]
    pub audit_level: Option<String>,
}

/// Cross-agent section of a config file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFileCrossAgent {
    /// Whether cross-agent surfacing is on.
    pub enabled: Option<bool>,
    /// Whether the user consented.
    #[serde(alias = "consent_given")]
    pub consent_given: Option<bool>,
    /// When consent was given.
    #[serde(alias = "consent_date")]
    pub consent_date: Option<String>,
    /// Allowed agents.
    pub agents: Option<Vec<String>>,
    /// Audit log path.
    #[serde(alias = "audit_log")]
    pub audit_log: Option<String>,
}

/// Scoring section of a config file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFileScoring {
    /// Decay half-life in days.
    #[serde(alias = "decay_half_life_days")]
    pub decay_half_life_days: Option<f64>,
    /// Harmful weight.
    #[serde(alias = "harmful_multiplier")]
    pub harmful_multiplier: Option<f64>,
    /// Feedback events needed before a draft goes active.
    #[serde(alias = "min_feedback_for_active")]
    pub min_feedback_for_active: Option<u32>,
    /// Decayed helpful needed for proven.
    #[serde(alias = "min_helpful_for_proven")]
    pub min_helpful_for_proven: Option<f64>,
    /// Maximum harmful ratio tolerated for proven.
    #[serde(alias = "max_harmful_ratio_for_proven")]
    pub max_harmful_ratio_for_proven: Option<f64>,
    /// Days without feedback after which a bullet counts as stale.
    #[serde(alias = "stale_after_days")]
    pub stale_after_days: Option<f64>,
}

/// Budget section of a config file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFileBudget {
    /// Oracle call cap per run.
    #[serde(alias = "max_oracle_calls_per_run")]
    pub max_oracle_calls_per_run: Option<u32>,
    /// Session cap per run.
    #[serde(alias = "max_sessions_per_run")]
    pub max_sessions_per_run: Option<u32>,
}

impl MemoryConfig {
    /// Loads configuration for the current working directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a present config file cannot be parsed.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().map_err(|e| Error::io("current_dir", e))?;
        Self::load_for(&cwd)
    }

    /// Loads configuration rooted at an explicit working directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a present config file cannot be parsed.
    pub fn load_for(cwd: &Path) -> Result<Self> {
        let mut config = Self {
            cwd: cwd.to_path_buf(),
            ..Self::default()
        };

        let global_path = config.home.join("config.json");
        if global_path.exists() {
            let file = read_json_config(&global_path)?;
            config.apply_config_file(file, true);
        }

        if let Some(repo_root) = find_repo_root(cwd) {
            if let Some(file) = read_overlay_config(&repo_root.join(".cass"))? {
                config.apply_config_file(file, false);
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies a parsed config file.
    ///
    /// `trusted` is true for the global tier only; the repo overlay may not
    /// redirect `cass_path`, `playbook_path`, `diary_dir`, `home`, or `cwd`.
    fn apply_config_file(&mut self, file: ConfigFile, trusted: bool) {
        if trusted {
            if let Some(home) = file.home {
                self.home = PathBuf::from(home);
            }
            if let Some(cwd) = file.cwd {
                self.cwd = PathBuf::from(cwd);
            }
            if let Some(path) = file.cass_path {
                self.cass_path = Some(PathBuf::from(path));
            }
            if let Some(path) = file.playbook_path {
                self.playbook_path = Some(PathBuf::from(path));
            }
            if let Some(dir) = file.diary_dir {
                self.diary_dir = Some(PathBuf::from(dir));
            }
        }

        if let Some(provider) = file.provider {
            self.provider = provider;
        }
        if let Some(model) = file.model.filter(|value| !value.trim().is_empty()) {
            self.model = Some(model);
        }
        if let Some(key) = file.api_key.filter(|value| !value.trim().is_empty()) {
            self.api_key = Some(SecretString::from(key));
        }
        if let Some(v) = file.max_bullets_in_context {
            self.max_bullets_in_context = v;
        }
        if let Some(v) = file.max_history_in_context {
            self.max_history_in_context = v;
        }
        if let Some(v) = file.session_lookback_days {
            self.session_lookback_days = v;
        }
        if let Some(v) = file.max_reflector_iterations {
            self.max_reflector_iterations = v;
        }
        if let Some(v) = file.json_output {
            self.json_output = v;
        }
        if let Some(v) = file.verbose {
            self.verbose = v;
        }

        if let Some(v) = file.decay_half_life_days {
            self.scoring.decay_half_life_days = v;
        }
        if let Some(v) = file.harmful_multiplier {
            self.scoring.harmful_multiplier = v;
        }
        if let Some(v) = file.maturity_promotion_threshold {
            self.scoring.maturity_promotion_threshold = v;
        }
        if let Some(v) = file.maturity_proven_threshold {
            self.scoring.maturity_proven_threshold = v;
        }
        if let Some(v) = file.prune_harmful_threshold {
            self.scoring.prune_harmful_threshold = v;
        }

        if let Some(sanitization) = file.sanitization {
            if let Some(v) = sanitization.enabled {
                self.sanitization.enabled = v;
            }
            if let Some(v) = sanitization.extra_patterns {
                self.sanitization.extra_patterns = v;
            }
            if let Some(v) = sanitization.audit_log {
                self.sanitization.audit_log = Some(PathBuf::from(v));
            }
            if let Some(v) = sanitization.audit_level {
                self.sanitization.audit_level = v;
            }
        }

        if let Some(cross_agent) = file.cross_agent {
            if let Some(v) = cross_agent.enabled {
                self.cross_agent.enabled = v;
            }
            if let Some(v) = cross_agent.consent_given {
                self.cross_agent.consent_given = v;
            }
            if cross_agent.consent_date.is_some() {
                self.cross_agent.consent_date = cross_agent.consent_date;
            }
            if let Some(v) = cross_agent.agents {
                self.cross_agent.agents = v;
            }
            if let Some(v) = cross_agent.audit_log {
                self.cross_agent.audit_log = Some(PathBuf::from(v));
            }
        }

        if let Some(scoring) = file.scoring {
            if let Some(v) = scoring.decay_half_life_days {
                self.scoring.decay_half_life_days = v;
            }
            if let Some(v) = scoring.harmful_multiplier {
                self.scoring.harmful_multiplier = v;
            }
            if let Some(v) = scoring.min_feedback_for_active {
                self.scoring.min_feedback_for_active = v;
            }
            if let Some(v) = scoring.min_helpful_for_proven {
                self.scoring.maturity_proven_threshold = v;
            }
            if let Some(v) = scoring.max_harmful_ratio_for_proven {
                self.scoring.max_harmful_ratio_for_proven = v;
            }
            if let Some(v) = scoring.stale_after_days {
                self.scoring.stale_after_days = v;
            }
        }

        if let Some(budget) = file.budget {
            if budget.max_oracle_calls_per_run.is_some() {
                self.budget.max_oracle_calls_per_run = budget.max_oracle_calls_per_run;
            }
            if budget.max_sessions_per_run.is_some() {
                self.budget.max_sessions_per_run = budget.max_sessions_per_run;
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CASS_PATH") {
            if !path.trim().is_empty() {
                self.cass_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(v) = std::env::var("CASS_MEMORY_VERBOSE") {
            self.verbose = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("CASS_MEMORY_LLM") {
            if v.eq_ignore_ascii_case("none") {
                self.provider = "none".to_string();
            }
        }
    }

    /// Sets the memory root.
    #[must_use]
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }
}

fn read_json_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io("read_config", e))?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

fn read_yaml_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io("read_config", e))?;
    serde_yaml_ng::from_str(&contents)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Reads the repo overlay config, preferring JSON when both forms exist.
fn read_overlay_config(overlay_dir: &Path) -> Result<Option<ConfigFile>> {
    let json_path = overlay_dir.join("config.json");
    if json_path.exists() {
        return read_json_config(&json_path).map(Some);
    }
    let yaml_path = overlay_dir.join("config.yaml");
    if yaml_path.exists() {
        return read_yaml_config(&yaml_path).map(Some);
    }
    Ok(None)
}
