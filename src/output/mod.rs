//! JSON command envelope for programmatic callers.

use crate::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A required argument was missing.
pub const ERROR_MISSING_REQUIRED: &str = "MISSING_REQUIRED";
/// User input failed validation.
pub const ERROR_INVALID_INPUT: &str = "INVALID_INPUT";
/// Anything that is the system's fault.
pub const ERROR_INTERNAL: &str = "INTERNAL_ERROR";

/// Error payload inside an envelope.
#[derive(Debug, Clone, Serialize)]
pub struct EnvelopeError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The JSON envelope every command emits in json mode.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Whether the command succeeded.
    pub success: bool,
    /// The command that ran.
    pub command: String,
    /// When the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Command-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    /// Extra bookkeeping (durations, degradation notes).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Envelope {
    /// Builds a success envelope.
    #[must_use]
    pub fn success(command: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            command: command.into(),
            timestamp: Utc::now(),
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    /// Builds a failure envelope.
    #[must_use]
    pub fn failure(
        command: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            command: command.into(),
            timestamp: Utc::now(),
            data: None,
            error: Some(EnvelopeError {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
            metadata: None,
        }
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Serializes the envelope as one JSON line.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // The envelope is plain data; serialization cannot realistically
            // fail, but a broken envelope must still be parseable.
            format!(
                r#"{{"success":false,"command":{:?},"error":{{"code":"INTERNAL_ERROR","message":"envelope serialization failed"}}}}"#,
                self.command
            )
        })
    }
}

/// Envelope error code for a library error.
#[must_use]
pub fn error_code_for(error: &Error) -> &'static str {
    match error {
        Error::Validation(_) => ERROR_INVALID_INPUT,
        _ => ERROR_INTERNAL,
    }
}

/// Process exit code for a library error: 2 for validation failures, 1
/// otherwise.
#[must_use]
pub fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Validation(_) => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let envelope = Envelope::success("context", serde_json::json!({"bullets": []}));
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json()).unwrap();

        assert_eq!(value["success"], true);
        assert_eq!(value["command"], "context");
        assert!(value.get("timestamp").is_some());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failure_envelope_shape() {
        let envelope = Envelope::failure("reflect", ERROR_INVALID_INPUT, "missing session path");
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json()).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "INVALID_INPUT");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(&Error::Validation("bad".to_string())), 2);
        assert_eq!(exit_code_for(&Error::io("x", "y")), 1);
        assert_eq!(error_code_for(&Error::Validation("bad".to_string())), ERROR_INVALID_INPUT);
        assert_eq!(error_code_for(&Error::Schema("bad".to_string())), ERROR_INTERNAL);
    }
}
