//! JSONL dump backfill adapter.
//!
//! Reads chat history exports laid out as `<root>/<chat_id>.jsonl`, one
//! raw record per line. Malformed lines are skipped with a warning so a
//! corrupt line never blocks the rest of a chat's history.

use crate::error::{Error, Result};
use crate::ingest::RecordSource;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Backfill source over a directory of per-chat JSONL export files.
#[derive(Debug, Clone)]
pub struct DumpSource {
    root: PathBuf,
}

impl DumpSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Discover the chat ids present in the dump directory.
    ///
    /// Files whose stem is not an integer chat id are skipped with a
    /// warning. Results are sorted for stable sync order.
    pub fn discover_chats(&self) -> Result<Vec<i64>> {
        let pattern = self.root.join("*.jsonl");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Source(format!("invalid dump pattern: {}", e)))?;

        let mut chat_ids = Vec::new();
        for entry in entries.flatten() {
            let stem = entry
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            match stem.parse::<i64>() {
                Ok(id) => chat_ids.push(id),
                Err(_) => {
                    tracing::warn!(
                        path = %entry.display(),
                        "Dump file name is not a chat id, skipping"
                    );
                }
            }
        }

        chat_ids.sort_unstable();
        Ok(chat_ids)
    }

    fn chat_file(&self, chat_id: i64) -> PathBuf {
        self.root.join(format!("{}.jsonl", chat_id))
    }
}

impl RecordSource for DumpSource {
    fn fetch(&self, chat_id: i64, min_native_id: i64) -> Result<Vec<Value>> {
        let path = self.chat_file(chat_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = std::fs::File::open(&path)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let raw: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping malformed dump line"
                    );
                    continue;
                }
            };

            // Bound the fetch by the caller's watermark. Records with an
            // unreadable id are passed through so the normalizer counts
            // them as errored instead of silently dropping them here.
            let above_watermark = raw
                .get("message_id")
                .and_then(Value::as_i64)
                .map(|id| id > min_native_id)
                .unwrap_or(true);
            if above_watermark {
                records.push(raw);
            }
        }

        Ok(records)
    }
}
