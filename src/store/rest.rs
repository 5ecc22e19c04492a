//! PostgREST-dialect task store client.
//!
//! The backing service exposes tables under `/rest/v1/{table}` with filter
//! operators in the query string (`status=eq.pending`,
//! `source_video_url=not.is.null`) and accepts partial updates via PATCH.
//! Authentication is the usual `apikey` header plus bearer token.
//!
//! Updates are retried with exponential backoff before the error is
//! surfaced; callers that persist logs treat a final failure as
//! best-effort loss (console warning), never as a pipeline abort.

use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tracing::debug;

use super::{StoreError, TaskStore};
use crate::core::config::Config;
use crate::core::types::{Task, TaskPatch};

/// Cap on total retry time for one store write.
const WRITE_RETRY_WINDOW: Duration = Duration::from_secs(10);

pub struct RestTaskStore {
    client: reqwest::Client,
    base_url: String,
    key: String,
    table: String,
}

impl RestTaskStore {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        key: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            key: key.into(),
            table: table.into(),
        }
    }

    /// Build a store client from resolved config, or report what is missing.
    pub fn from_config(cfg: &Config) -> Result<Self, StoreError> {
        let url = cfg
            .store_url
            .as_deref()
            .ok_or(StoreError::NotConfigured("store_url / CAMEO_STORE_URL"))?;
        let key = cfg
            .store_key
            .as_deref()
            .ok_or(StoreError::NotConfigured("store_key / CAMEO_STORE_KEY"))?;
        let client = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self::new(client, url, key, cfg.store_table.clone()))
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }

    async fn send_update(&self, id: &str, patch: &TaskPatch) -> Result<(), StoreError> {
        let resp = self
            .authed(self.client.patch(self.table_url()))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Http {
            status: status.as_u16(),
            body: truncate(&body, 300),
        })
    }
}

#[async_trait::async_trait]
impl TaskStore for RestTaskStore {
    async fn fetch_pending(&self) -> Result<Vec<Task>, StoreError> {
        let resp = self
            .authed(self.client.get(self.table_url()))
            .query(&[
                ("status", "eq.pending"),
                ("source_video_url", "not.is.null"),
                ("order", "created_at.asc"),
                ("select", "*"),
            ])
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Http {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let tasks: Vec<Task> = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        debug!("task store returned {} pending rows", tasks.len());
        Ok(tasks)
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<(), StoreError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_elapsed_time(Some(WRITE_RETRY_WINDOW))
            .build();

        backoff::future::retry(policy, || async {
            self.send_update(id, patch).await.map_err(|e| match e {
                // 4xx means the request itself is wrong; retrying cannot help.
                StoreError::Http { status, .. } if (400..500).contains(&status) => {
                    backoff::Error::permanent(e)
                }
                other => backoff::Error::transient(other),
            })
        })
        .await
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
