//! Append-only JSONL files.
//!
//! Outcomes, the processed-session log, trauma entries, and the toxic-bullet
//! log all share this format: one JSON record per line, appended, never
//! rewritten. Readers tolerate malformed lines by skipping them.

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Appends one record as a JSON line, creating the file and parents as needed.
///
/// # Errors
///
/// Returns [`Error::Io`] on filesystem failure or [`Error::Parse`] when the
/// record cannot be serialized.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("create_jsonl_dir", e))?;
        }
    }

    let line = serde_json::to_string(record)
        .map_err(|e| Error::parse(path.display().to_string(), e))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io("open_jsonl", e))?;
    writeln!(file, "{line}").map_err(|e| Error::io("append_jsonl", e))?;
    Ok(())
}

/// Reads all well-formed records; a missing file reads as empty.
///
/// Malformed lines are logged and skipped, never fatal.
///
/// # Errors
///
/// Returns [`Error::Io`] only when an existing file cannot be read.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents =
        std::fs::read_to_string(path).map_err(|e| Error::io("read_jsonl", e))?;

    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    file = %path.display(),
                    line = index + 1,
                    error = %e,
                    "skipping malformed jsonl line"
                );
            },
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_append_and_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");

        append_jsonl(&path, &Record { name: "a".to_string(), count: 1 }).unwrap();
        append_jsonl(&path, &Record { name: "b".to_string(), count: 2 }).unwrap();

        let records: Vec<Record> = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "b");
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let records: Vec<Record> = read_jsonl(&dir.path().join("absent.jsonl")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        std::fs::write(
            &path,
            "{\"name\":\"ok\",\"count\":1}\nnot json at all\n{\"name\":\"also ok\",\"count\":2}\n\n",
        )
        .unwrap();

        let records: Vec<Record> = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
    }
}
