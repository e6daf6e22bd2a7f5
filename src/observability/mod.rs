//! Structured logging.

use std::fmt;
use std::sync::Once;

use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing_subscriber::field::RecordFields;
use tracing_subscriber::fmt::format::{FormatFields, Writer};
use tracing_subscriber::EnvFilter;

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs.
    Json,
    /// Human-friendly logs for local debugging.
    Pretty,
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Log format.
    pub format: LogFormat,
    /// Log filter (e.g. `cass_memory=info`).
    pub filter: EnvFilter,
}

impl LoggingConfig {
    /// Builds logging configuration from environment variables.
    ///
    /// `CASS_MEMORY_LOG_FILTER` overrides everything; `CASS_MEMORY_VERBOSE`
    /// (or the `verbose` flag) raises the default level to debug;
    /// `CASS_MEMORY_LOG_FORMAT` selects `json` or `pretty`.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        let filter = std::env::var("CASS_MEMORY_LOG_FILTER")
            .ok()
            .map(EnvFilter::new)
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| default_filter(verbose));

        let format = match std::env::var("CASS_MEMORY_LOG_FORMAT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self { format, filter }
    }
}

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose || verbose_env() {
        "cass_memory=debug"
    } else {
        "cass_memory=info"
    };
    EnvFilter::new(level)
}

fn verbose_env() -> bool {
    std::env::var("CASS_MEMORY_VERBOSE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

static INIT: Once = Once::new();

/// Initializes the global tracing subscriber once; later calls are no-ops.
///
/// Logs go to stderr so stdout stays clean for envelopes. Event fields pass
/// through [`RedactingJsonFields`] in both formats, so sensitive field names
/// (`content`, `api_key`, ...) never reach the log unmasked.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let config = LoggingConfig::from_env(verbose);
        match config.format {
            LogFormat::Json => {
                tracing_subscriber::fmt()
                    .json()
                    .fmt_fields(RedactingJsonFields::default())
                    .with_env_filter(config.filter)
                    .with_writer(std::io::stderr)
                    .init();
            },
            LogFormat::Pretty => {
                tracing_subscriber::fmt()
                    .fmt_fields(RedactingJsonFields::default())
                    .with_env_filter(config.filter)
                    .with_writer(std::io::stderr)
                    .init();
            },
        }
    });
}

/// Redactor for sensitive log fields.
#[derive(Debug, Clone)]
pub struct LogRedactor {
    sensitive_fields: Vec<&'static str>,
    max_len: usize,
}

impl LogRedactor {
    /// Creates a redactor with default rules.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sensitive_fields: vec![
                "content",
                "prompt",
                "token",
                "secret",
                "password",
                "api_key",
                "api-key",
                "authorization",
            ],
            max_len: 160,
        }
    }

    /// Redacts a value based on its field name, truncating long values.
    #[must_use]
    pub fn redact_field(&self, field: &str, value: &str) -> String {
        let field_lower = field.to_lowercase();
        if self
            .sensitive_fields
            .iter()
            .any(|needle| field_lower.contains(needle))
        {
            return "[REDACTED]".to_string();
        }

        if value.chars().count() > self.max_len {
            let truncated: String = value.chars().take(self.max_len).collect();
            return format!("{truncated}...(truncated)");
        }

        value.to_string()
    }
}

impl Default for LogRedactor {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON field formatter with redaction support.
#[derive(Debug, Clone, Default)]
pub struct RedactingJsonFields {
    redactor: LogRedactor,
}

impl RedactingJsonFields {
    /// Creates a redacting JSON field formatter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            redactor: LogRedactor::new(),
        }
    }
}

impl<'writer> FormatFields<'writer> for RedactingJsonFields {
    fn format_fields<R: RecordFields>(&self, mut writer: Writer<'writer>, fields: R) -> fmt::Result {
        let mut visitor = RedactingVisitor::new(&self.redactor);
        fields.record(&mut visitor);
        let json = serde_json::to_string(&visitor.values).map_err(|_| fmt::Error)?;
        writer.write_str(&json)
    }
}

struct RedactingVisitor<'a> {
    values: Map<String, Value>,
    redactor: &'a LogRedactor,
}

impl<'a> RedactingVisitor<'a> {
    fn new(redactor: &'a LogRedactor) -> Self {
        Self {
            values: Map::new(),
            redactor,
        }
    }

    fn insert_str(&mut self, field: &Field, value: &str) {
        let redacted = self.redactor.redact_field(field.name(), value);
        self.values
            .insert(field.name().to_string(), Value::String(redacted));
    }

    fn insert_number(&mut self, field: &Field, number: Number) {
        self.values
            .insert(field.name().to_string(), Value::Number(number));
    }
}

impl Visit for RedactingVisitor<'_> {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert_number(field, Number::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert_number(field, Number::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.values
            .insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let number = Number::from_f64(value).unwrap_or_else(|| Number::from(0_u64));
        self.insert_number(field, number);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert_str(field, value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let formatted = format!("{value:?}");
        self.insert_str(field, &formatted);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert_str(field, &value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::prelude::*;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedWriter {
        type Writer = SharedWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_sensitive_fields_are_masked() {
        let redactor = LogRedactor::new();
        assert_eq!(redactor.redact_field("api_key", "sk-ant-xyz"), "[REDACTED]");
        assert_eq!(redactor.redact_field("session_content", "secret stuff"), "[REDACTED]");
        assert_eq!(redactor.redact_field("bullet_id", "b-1-abc"), "b-1-abc");
    }

    #[test]
    fn test_long_values_truncated() {
        let redactor = LogRedactor::new();
        let long = "z".repeat(500);
        let redacted = redactor.redact_field("path", &long);
        assert!(redacted.ends_with("...(truncated)"));
        assert!(redacted.len() < long.len());
    }

    #[test]
    fn test_format_selection_defaults_to_pretty() {
        let config = LoggingConfig::from_env(false);
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_live_emission_redacts_sensitive_fields() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .json()
                .fmt_fields(RedactingJsonFields::default())
                .with_writer(writer),
        );

        let _guard = tracing::subscriber::set_default(subscriber);
        tracing::info!(
            content = "Always force-push to main",
            bullet_id = "b-1-abc123",
            "add blocked by toxic log"
        );

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let line = output.lines().next().expect("log line");
        assert!(!line.contains("force-push"), "raw content leaked: {line}");
        assert!(line.contains("[REDACTED]"));
        assert!(line.contains("b-1-abc123"));
    }

    #[test]
    fn test_live_emission_redacts_display_recorded_fields() {
        // `%value` fields arrive through record_debug; they must be
        // redacted the same way as plain string fields.
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = SharedWriter(buffer.clone());
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .json()
                .fmt_fields(RedactingJsonFields::default())
                .with_writer(writer),
        );

        let _guard = tracing::subscriber::set_default(subscriber);
        let secret = String::from("sk-ant-api03-very-secret");
        tracing::info!(api_key = %secret, "oracle configured");

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(!output.contains("very-secret"));
        assert!(output.contains("[REDACTED]"));
    }
}
