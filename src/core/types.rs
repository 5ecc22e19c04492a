//! Task-record types mirrored from the external task store.
//!
//! The store is the system of record: tasks are created there by the web
//! app, claimed by this runner, and updated in place as the automation
//! progresses. Everything here serializes 1:1 with the store's columns, so
//! unknown columns on the wire are ignored and absent ones default.

use serde::{Deserialize, Serialize};

/// Lifecycle of one queued automation request.
///
/// `pending → processing → completed | failed`. Terminal states are never
/// re-entered: tasks are fetched once per invocation, not re-polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Severity of one progress-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

impl LogLevel {
    /// Console glyph prefix used when mirroring an entry to local output.
    pub fn glyph(self) -> &'static str {
        match self {
            LogLevel::Info => "ℹ️",
            LogLevel::Success => "✅",
            LogLevel::Warn => "⚠️",
            LogLevel::Error => "❌",
        }
    }
}

/// One append-only progress-log entry attached to a task row.
///
/// Entry ids increment monotonically within a run starting from a high
/// base, so entries written by other contributors to the same row never
/// collide. Entries are never edited, removed, or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

/// One row of the task table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub source_video_url: Option<String>,
    /// Foreign key to the resulting artifact row, assigned server-side.
    #[serde(default)]
    pub character_id: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    // Result fields, populated only on success.
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Populated only on failure.
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Partial update sent back to the store.
///
/// Only set fields serialize, so a PATCH never clobbers columns it does not
/// mention. The store assigns its own `updated_at` server-side.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn logs(logs: Vec<LogEntry>) -> Self {
        Self {
            logs: Some(logs),
            ..Default::default()
        }
    }

    pub fn with_logs(mut self, logs: Vec<LogEntry>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// What the Result Extractor managed to pull off the profile page.
///
/// Every field is optional by design: partial extraction still completes
/// the task.
#[derive(Debug, Clone, Default)]
pub struct CharacterProfile {
    pub remote_id: Option<String>,
    pub profile_url: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl CharacterProfile {
    /// Result fields the heuristics could not derive, for warning logs.
    pub fn gaps(&self) -> Vec<ExtractionGap> {
        let mut gaps = Vec::new();
        if self.remote_id.is_none() {
            gaps.push(ExtractionGap::RemoteId);
        }
        if self.display_name.is_none() {
            gaps.push(ExtractionGap::DisplayName);
        }
        if self.avatar_url.is_none() {
            gaps.push(ExtractionGap::AvatarUrl);
        }
        gaps
    }
}

/// A result field the extractor could not derive. Warning-level only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionGap {
    RemoteId,
    DisplayName,
    AvatarUrl,
}

impl std::fmt::Display for ExtractionGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExtractionGap::RemoteId => "remote id",
            ExtractionGap::DisplayName => "display name",
            ExtractionGap::AvatarUrl => "avatar url",
        };
        f.write_str(name)
    }
}

/// Per-run counters for the final console summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub fetched: usize,
    pub completed: usize,
    pub failed: usize,
}
