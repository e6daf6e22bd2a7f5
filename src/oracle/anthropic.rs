//! Anthropic extraction client.

use super::Oracle;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Anthropic-backed extraction oracle.
pub struct AnthropicOracle {
    /// API key.
    api_key: Option<String>,
    /// API endpoint.
    endpoint: String,
    /// Model to use.
    model: String,
    /// HTTP client.
    client: reqwest::blocking::Client,
}

impl AnthropicOracle {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.anthropic.com/v1";

    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "claude-3-5-haiku-latest";

    /// Creates a new client, reading `ANTHROPIC_API_KEY` when set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            client: build_client(),
        }
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Validates that a usable API key is configured.
    fn validate(&self) -> Result<&str> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::OracleFailure("ANTHROPIC_API_KEY not set".to_string()))?;

        if !Self::is_valid_api_key_format(key) {
            return Err(Error::OracleFailure(
                "invalid API key format: expected 'sk-ant-' prefix".to_string(),
            ));
        }
        Ok(key)
    }

    /// Checks the `sk-ant-` key shape before making a network request.
    fn is_valid_api_key_format(key: &str) -> bool {
        const MIN_KEY_LENGTH: usize = 40;
        const PREFIX: &str = "sk-ant-";

        key.starts_with(PREFIX)
            && key.len() >= MIN_KEY_LENGTH
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }
}

impl Default for AnthropicOracle {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: String,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl Oracle for AnthropicOracle {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn extract(&self, schema: &serde_json::Value, prompt: &str) -> Result<serde_json::Value> {
        let key = self.validate()?;

        let system = format!(
            "You extract structured data. Respond with a single JSON object matching this \
             schema, and nothing else:\n{schema}"
        );
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: 4096,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .header("x-api-key", key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .map_err(|e| Error::OracleFailure(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::OracleFailure(format!(
                "API returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .map_err(|e| Error::OracleFailure(format!("unreadable response: {e}")))?;

        let text: String = parsed
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect();

        parse_json_object(&text)
    }
}

/// Parses the model's reply as JSON, tolerating code fences and prose around
/// the object.
fn parse_json_object(text: &str) -> Result<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(Error::OracleFailure(format!(
        "response is not a JSON object: {}",
        trimmed.chars().take(120).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format_validation() {
        assert!(AnthropicOracle::is_valid_api_key_format(
            "sk-ant-REDACTED"
        ));
        assert!(!AnthropicOracle::is_valid_api_key_format("sk-other-key"));
        assert!(!AnthropicOracle::is_valid_api_key_format("sk-ant-short"));
        assert!(!AnthropicOracle::is_valid_api_key_format(
            "sk-ant-api03-with spaces and $ymbols aaaaaaaaaaaa"
        ));
    }

    #[test]
    fn test_missing_key_fails_before_network() {
        let oracle = AnthropicOracle {
            api_key: None,
            endpoint: AnthropicOracle::DEFAULT_ENDPOINT.to_string(),
            model: AnthropicOracle::DEFAULT_MODEL.to_string(),
            client: build_client(),
        };
        assert!(oracle.extract(&serde_json::json!({}), "prompt").is_err());
    }

    #[test]
    fn test_parse_json_object_tolerates_fences() {
        let value = parse_json_object("```json\n{\"deltas\": []}\n```").unwrap();
        assert!(value.get("deltas").is_some());

        let value = parse_json_object("Here you go: {\"a\": 1} hope that helps").unwrap();
        assert_eq!(value["a"], 1);

        assert!(parse_json_object("no json here").is_err());
    }
}
