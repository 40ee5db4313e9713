//! Side channel for swallowed failures and skip-cache messages.
//!
//! Every record is emitted as a `tracing` warning. A log may additionally
//! append `[<RFC3339>] <detail>` lines to a file and keep records in memory.
//! Writing the log never fails the call that produced the record.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use fncache_core::Timestamp;

/// One logged failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub at: Timestamp,
    pub detail: String,
}

impl FailureRecord {
    /// The line appended to the log file, without the newline.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {}",
            self.at.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.detail
        )
    }
}

#[derive(Debug, Default)]
pub struct FailureLog {
    file: Option<PathBuf>,
    retained: Option<Mutex<Vec<FailureRecord>>>,
}

impl FailureLog {
    /// A log that only emits tracing events.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records to `path` as well.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
            retained: None,
        }
    }

    /// Keep records in memory as well.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            retained: Some(Mutex::new(Vec::new())),
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn record(&self, detail: impl Into<String>) {
        let record = FailureRecord {
            at: Utc::now(),
            detail: detail.into(),
        };
        tracing::warn!(detail = %record.detail, "fncache failure");

        if let Some(path) = &self.file {
            if let Err(e) = append_line(path, &record.to_line()) {
                tracing::error!(error = %e, path = %path.display(), "failed to write failure log");
            }
        }

        if let Some(retained) = &self.retained {
            if let Ok(mut records) = retained.lock() {
                records.push(record);
            }
        }
    }

    /// Records retained in memory. Empty unless built with [`Self::in_memory`].
    pub fn records(&self) -> Vec<FailureRecord> {
        self.retained
            .as_ref()
            .and_then(|r| r.lock().ok().map(|records| records.clone()))
            .unwrap_or_default()
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}
