//! Direct session-file parsing for when the history binary is unavailable.
//!
//! Supports `.jsonl` (one JSON message per line), `.json` (a top-level array
//! of messages or `{messages: [...]}`), and `.md` (returned raw). Malformed
//! or missing files parse to `None`.

use serde_json::Value;
use std::path::Path;

/// Parses a session transcript into `[role] content` lines.
#[must_use]
pub fn parse_session_file(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?.to_lowercase();
    let contents = std::fs::read_to_string(path).ok()?;

    match extension.as_str() {
        "jsonl" => parse_jsonl(&contents),
        "json" => parse_json(&contents),
        "md" => Some(contents),
        _ => None,
    }
}

fn parse_jsonl(contents: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).ok()?;
        if let Some(rendered) = render_message(&value) {
            lines.push(rendered);
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn parse_json(contents: &str) -> Option<String> {
    let value: Value = serde_json::from_str(contents).ok()?;
    let messages = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map.get("messages")?.as_array()?.as_slice(),
        _ => return None,
    };

    let lines: Vec<String> = messages.iter().filter_map(render_message).collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Renders one message as `[role] content`.
///
/// Role comes from `role` or `type`; content may be a string, an array of
/// parts joined with newlines, or an object carrying a `text` field.
fn render_message(message: &Value) -> Option<String> {
    let role = message
        .get("role")
        .or_else(|| message.get("type"))
        .and_then(Value::as_str)?;

    let content = message.get("content").and_then(content_to_text)?;
    if content.trim().is_empty() {
        return None;
    }

    Some(format!("[{role}] {content}"))
}

fn content_to_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let rendered: Vec<String> = parts.iter().filter_map(content_to_text).collect();
            if rendered.is_empty() {
                None
            } else {
                Some(rendered.join("\n"))
            }
        },
        Value::Object(map) => map.get("text").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_session(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_jsonl_messages() {
        let dir = TempDir::new().unwrap();
        let path = write_session(
            &dir,
            "s.jsonl",
            "{\"role\":\"user\",\"content\":\"Hello\"}\n{\"role\":\"assistant\",\"content\":\"Hi there\"}\n",
        );

        let text = parse_session_file(&path).unwrap();
        assert!(text.contains("[user] Hello"));
        assert!(text.contains("[assistant] Hi there"));
    }

    #[test]
    fn test_jsonl_type_field_and_structured_content() {
        let dir = TempDir::new().unwrap();
        let path = write_session(
            &dir,
            "s.jsonl",
            concat!(
                "{\"type\":\"assistant\",\"content\":[{\"text\":\"part one\"},{\"text\":\"part two\"}]}\n",
                "{\"role\":\"user\",\"content\":{\"text\":\"object form\"}}\n",
            ),
        );

        let text = parse_session_file(&path).unwrap();
        assert!(text.contains("[assistant] part one\npart two"));
        assert!(text.contains("[user] object form"));
    }

    #[test]
    fn test_json_array_and_wrapped_messages() {
        let dir = TempDir::new().unwrap();

        let array = write_session(
            &dir,
            "a.json",
            r#"[{"role":"user","content":"query"},{"role":"assistant","content":"answer"}]"#,
        );
        assert!(parse_session_file(&array).unwrap().contains("[assistant] answer"));

        let wrapped = write_session(
            &dir,
            "w.json",
            r#"{"messages":[{"role":"user","content":"inner"}]}"#,
        );
        assert!(parse_session_file(&wrapped).unwrap().contains("[user] inner"));
    }

    #[test]
    fn test_markdown_returned_raw() {
        let dir = TempDir::new().unwrap();
        let path = write_session(&dir, "notes.md", "# Session\nraw text\n");
        assert_eq!(parse_session_file(&path).unwrap(), "# Session\nraw text\n");
    }

    #[test]
    fn test_malformed_and_missing_files_yield_none() {
        let dir = TempDir::new().unwrap();

        let bad = write_session(&dir, "bad.jsonl", "{\"role\":\"user\"\n");
        assert!(parse_session_file(&bad).is_none());

        assert!(parse_session_file(&dir.path().join("absent.jsonl")).is_none());

        let unknown = write_session(&dir, "s.txt", "plain");
        assert!(parse_session_file(&unknown).is_none());
    }

    #[test]
    fn test_messages_without_content_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_session(
            &dir,
            "s.jsonl",
            "{\"role\":\"system\"}\n{\"role\":\"user\",\"content\":\"kept\"}\n",
        );
        let text = parse_session_file(&path).unwrap();
        assert_eq!(text, "[user] kept");
    }
}
