//! External task store: the queryable record store tasks live in.
//!
//! The runner is a pure consumer: it fetches the pending queue once at
//! start-up and patches rows as work progresses. The store is external
//! infrastructure, so everything here is interface plus one REST-dialect
//! client; the automation core only ever sees the [`TaskStore`] trait.

pub mod rest;

pub use rest::RestTaskStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::types::{Task, TaskPatch};

/// Errors surfaced by a task-store backend.
///
/// Writes are best-effort at the call sites that can tolerate loss (log
/// flushes); fetches are not, since an unreadable queue means there is
/// nothing to do.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Transport(String),

    #[error("store rejected request with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("store response could not be decoded: {0}")]
    Decode(String),

    #[error("store not configured: {0}")]
    NotConfigured(&'static str),
}

/// The queryable, updatable record store holding automation tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks with `status = pending` and a non-null source reference,
    /// ordered oldest-request-first. Called exactly once per run.
    async fn fetch_pending(&self) -> Result<Vec<Task>, StoreError>;

    /// Partial update of one row. The store assigns its own update
    /// timestamp server-side.
    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<(), StoreError>;
}
