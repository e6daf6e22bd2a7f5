//! Extraction oracle abstraction.
//!
//! The LLM is an external collaborator modeled as `extract(schema, prompt) →
//! structured object`. The production implementation calls Anthropic; a
//! disabled implementation backs `CASS_MEMORY_LLM=none`; tests substitute a
//! deterministic stub behind the same trait.

mod anthropic;

pub use anthropic::AnthropicOracle;

use crate::config::MemoryConfig;
use crate::{Error, Result};

/// Structured-extraction capability.
pub trait Oracle: Send + Sync {
    /// The provider name.
    fn name(&self) -> &'static str;

    /// Extracts an object matching `schema` from `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OracleFailure`] when the call fails or the response
    /// is not valid JSON.
    fn extract(&self, schema: &serde_json::Value, prompt: &str) -> Result<serde_json::Value>;
}

/// Oracle used when extraction is switched off.
///
/// Every call fails with [`Error::OracleFailure`]; reflection treats that as
/// "no deltas" and the pipeline proceeds without rule extraction.
pub struct DisabledOracle;

impl Oracle for DisabledOracle {
    fn name(&self) -> &'static str {
        "none"
    }

    fn extract(&self, _schema: &serde_json::Value, _prompt: &str) -> Result<serde_json::Value> {
        Err(Error::OracleFailure("oracle disabled".to_string()))
    }
}

/// Builds the configured oracle.
///
/// # Errors
///
/// Returns [`Error::Config`] for an unknown provider.
pub fn from_config(config: &MemoryConfig) -> Result<Box<dyn Oracle>> {
    match config.provider.as_str() {
        "none" => Ok(Box::new(DisabledOracle)),
        "anthropic" => {
            let mut oracle = AnthropicOracle::new();
            if let Some(model) = &config.model {
                oracle = oracle.with_model(model.clone());
            }
            if let Some(key) = &config.api_key {
                use secrecy::ExposeSecret;
                oracle = oracle.with_api_key(key.expose_secret());
            }
            Ok(Box::new(oracle))
        },
        other => Err(Error::Config(format!("unknown oracle provider '{other}'"))),
    }
}
