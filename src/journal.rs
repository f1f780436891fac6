//! Call journal: one JSON line per completed relay call.
//!
//! Recent records stay in a ring buffer; when a file is configured every record
//! is also appended to it. Backend keys are never recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_JOURNAL_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub api_type: String,
    /// Model the caller asked for.
    pub model: String,
    /// Model sent upstream, after any backend override.
    pub upstream_model: String,
    pub stream: bool,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub has_images: bool,
}

pub struct Journal {
    entries: VecDeque<CallRecord>,
    writer: Option<BufWriter<File>>,
}

impl Journal {
    /// A journal that only keeps the ring buffer.
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            writer: None,
        }
    }

    /// Open (or create) a JSONL journal, loading its most recent records.
    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = VecDeque::with_capacity(MAX_JOURNAL_ENTRIES);

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(|l| l.ok()) {
                if let Ok(record) = serde_json::from_str::<CallRecord>(&line) {
                    if entries.len() >= MAX_JOURNAL_ENTRIES {
                        entries.pop_front();
                    }
                    entries.push_back(record);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(Self {
            entries,
            writer: Some(BufWriter::new(file)),
        })
    }

    pub fn record(&mut self, record: CallRecord) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&record) {
                let written = writeln!(writer, "{json}").and_then(|()| writer.flush());
                if let Err(e) = written {
                    tracing::warn!(error = %e, "Failed to append to call journal");
                }
            }
        }
        if self.entries.len() >= MAX_JOURNAL_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<CallRecord> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedJournal(Arc<Mutex<Journal>>);

impl SharedJournal {
    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Journal::in_memory())))
    }

    pub fn open(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Journal::open(file_path)?))))
    }

    pub fn record(&self, record: CallRecord) {
        if let Ok(mut journal) = self.0.lock() {
            journal.record(record);
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<CallRecord> {
        self.0.lock().map(|j| j.recent(limit)).unwrap_or_default()
    }
}

impl Default for SharedJournal {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model: &str, status: u16) -> CallRecord {
        CallRecord {
            timestamp: Utc::now(),
            api_type: "chat_completions".to_string(),
            model: model.to_string(),
            upstream_model: model.to_string(),
            stream: false,
            status,
            error_type: None,
            duration_ms: 12,
            has_images: false,
        }
    }

    #[test]
    fn test_file_journal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("calls.jsonl");

        let journal = SharedJournal::open(&path).unwrap();
        journal.record(record("a", 200));
        journal.record(CallRecord {
            error_type: Some("rate_limit_error".to_string()),
            ..record("b", 429)
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"error_type\":\"rate_limit_error\""));

        let reopened = Journal::open(&path).unwrap();
        let recent = reopened.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].model, "b");
    }

    #[test]
    fn test_ring_buffer_caps_entries() {
        let mut journal = Journal::in_memory();
        for i in 0..(MAX_JOURNAL_ENTRIES + 5) {
            journal.record(record(&i.to_string(), 200));
        }
        assert_eq!(journal.entries.len(), MAX_JOURNAL_ENTRIES);
        assert_eq!(journal.recent(1)[0].model, (MAX_JOURNAL_ENTRIES + 4).to_string());
    }
}
