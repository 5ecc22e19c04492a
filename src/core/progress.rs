//! Session progress log: the task's persisted, append-only event trail.
//!
//! Every notable micro-action appends one leveled, timestamped entry and
//! immediately flushes the whole log array to the task store. No batching:
//! a crash mid-task must not lose entries already written. Each entry is
//! also mirrored to local console output with a level glyph so an operator
//! watching the run sees the same trail reviewers see later in the store.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::core::types::{LogEntry, LogLevel};
use crate::store::TaskStore;

/// Append-only progress log for one task's run.
///
/// Entry ids start from a high, time-derived base and increment by one, so
/// ids are strictly monotonic within the run and never collide with
/// entries other contributors appended to the same row earlier.
pub struct ProgressLog {
    task_id: String,
    entries: Vec<LogEntry>,
    next_id: u64,
    store: Arc<dyn TaskStore>,
}

impl ProgressLog {
    /// Wrap a task's existing log entries. New ids continue above both the
    /// time base and whatever the row already holds.
    pub fn new(task_id: impl Into<String>, existing: Vec<LogEntry>, store: Arc<dyn TaskStore>) -> Self {
        let time_base = Utc::now().timestamp_millis().max(0) as u64;
        let existing_max = existing.iter().map(|e| e.id).max().unwrap_or(0);
        Self {
            task_id: task_id.into(),
            next_id: time_base.max(existing_max + 1),
            entries: existing,
            store,
        }
    }

    pub async fn info(&mut self, message: impl Into<String>) {
        self.append(LogLevel::Info, message.into()).await
    }

    pub async fn success(&mut self, message: impl Into<String>) {
        self.append(LogLevel::Success, message.into()).await
    }

    pub async fn warn(&mut self, message: impl Into<String>) {
        self.append(LogLevel::Warn, message.into()).await
    }

    pub async fn error(&mut self, message: impl Into<String>) {
        self.append(LogLevel::Error, message.into()).await
    }

    /// Append one entry, mirror it to the console, and flush the full log
    /// to the store. A rejected store write is reported locally and the
    /// entry is retained in memory for the next flush: best-effort
    /// persistence, never a pipeline error.
    pub async fn append(&mut self, level: LogLevel, message: String) {
        let entry = LogEntry {
            id: self.next_id,
            timestamp: Utc::now().to_rfc3339(),
            level,
            message,
        };
        self.next_id += 1;

        match level {
            LogLevel::Info | LogLevel::Success => {
                info!("{} [{}] {}", level.glyph(), self.task_id, entry.message)
            }
            LogLevel::Warn => warn!("{} [{}] {}", level.glyph(), self.task_id, entry.message),
            LogLevel::Error => error!("{} [{}] {}", level.glyph(), self.task_id, entry.message),
        }

        self.entries.push(entry);
        self.flush().await;
    }

    async fn flush(&self) {
        let patch = crate::core::types::TaskPatch::logs(self.entries.clone());
        if let Err(e) = self.store.update(&self.task_id, &patch).await {
            warn!(
                "⚠️ [{}] progress log flush failed (entry retained in memory): {}",
                self.task_id, e
            );
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Entries in insertion order, the run's full trail so far.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}
