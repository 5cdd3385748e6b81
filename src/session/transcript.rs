use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const TRANSCRIPT_VERSION: u32 = 1;

/// Append-only line-delimited JSON transcript for one session.
///
/// The first record is a session header; every subsequent line is one message.
/// Appends are whole-line writes, so concurrent writers on the same session
/// interleave at line granularity at worst.
pub struct TranscriptWriter {
    path: PathBuf,
    session_id: String,
    cwd: PathBuf,
}

impl TranscriptWriter {
    pub fn new(path: PathBuf, session_id: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            path,
            session_id: session_id.into(),
            cwd,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one message record, writing the session header first if the
    /// transcript does not exist yet.
    pub fn append_message(
        &self,
        role: &str,
        text: &str,
        timestamp: u64,
        stop_reason: Option<&str>,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create transcript directory: {}", parent.display())
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open transcript: {}", self.path.display()))?;

        let needs_header = file
            .metadata()
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);
        if needs_header {
            let header = json!({
                "type": "session",
                "version": TRANSCRIPT_VERSION,
                "id": self.session_id,
                "timestamp": Utc::now().to_rfc3339(),
                "cwd": self.cwd.display().to_string(),
            });
            writeln!(file, "{header}").with_context(|| {
                format!("Failed to write transcript header: {}", self.path.display())
            })?;
        }

        let mut message = json!({
            "role": role,
            "content": [{"type": "text", "text": text}],
            "timestamp": timestamp,
        });
        if let Some(reason) = stop_reason {
            message["stopReason"] = json!(reason);
        }
        let record = json!({
            "type": "message",
            "id": uuid::Uuid::new_v4().to_string(),
            "timestamp": timestamp,
            "message": message,
        });
        writeln!(file, "{record}")
            .with_context(|| format!("Failed to append transcript: {}", self.path.display()))?;
        Ok(())
    }

    pub fn append_user_message(&self, text: &str, timestamp: u64) -> Result<()> {
        self.append_message("user", text, timestamp, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn first_append_writes_header_then_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions").join("s1.jsonl");
        let writer = TranscriptWriter::new(path.clone(), "s1", dir.path().to_path_buf());

        writer.append_user_message("hi", 1_700_000_000).unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "session");
        assert_eq!(lines[0]["version"], 1);
        assert_eq!(lines[0]["id"], "s1");
        assert_eq!(lines[1]["type"], "message");
        assert_eq!(lines[1]["message"]["role"], "user");
        assert_eq!(lines[1]["message"]["content"][0]["text"], "hi");
        assert_eq!(lines[1]["message"]["timestamp"], 1_700_000_000u64);
    }

    #[test]
    fn second_append_does_not_repeat_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s2.jsonl");
        let writer = TranscriptWriter::new(path.clone(), "s2", dir.path().to_path_buf());

        writer.append_user_message("one", 1).unwrap();
        writer
            .append_message("assistant", "two", 2, Some("end_turn"))
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["message"]["role"], "assistant");
        assert_eq!(lines[2]["message"]["stopReason"], "end_turn");
    }

    #[test]
    fn user_messages_have_no_stop_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s3.jsonl");
        let writer = TranscriptWriter::new(path.clone(), "s3", dir.path().to_path_buf());
        writer.append_user_message("hello", 5).unwrap();

        let lines = read_lines(&path);
        assert!(lines[1]["message"].get("stopReason").is_none());
    }
}
