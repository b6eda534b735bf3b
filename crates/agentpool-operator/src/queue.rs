//! Process queue metrics, the demand signal for autoscaling.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("queue API returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    Enqueued,
    Running,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "ENQUEUED",
            Self::Running => "RUNNING",
        }
    }
}

/// One process in the queue. Only counted; the fields are kept for logging.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub status: String,
}

#[async_trait]
pub trait QueueMetrics: Send + Sync {
    async fn query(
        &self,
        status: QueueStatus,
        max_results: usize,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<QueueEntry>, QueueError>;
}

/// Queries `GET <base>/api/v2/process/requirements`.
pub struct HttpQueueClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpQueueClient {
    pub fn new(http: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn query_params(
        status: QueueStatus,
        max_results: usize,
        selector: &BTreeMap<String, String>,
    ) -> Vec<(String, String)> {
        let mut params = vec![
            ("status".to_string(), status.as_str().to_string()),
            ("limit".to_string(), max_results.to_string()),
        ];
        for (k, v) in selector {
            params.push((format!("requirements.{k}"), v.clone()));
        }
        params
    }
}

#[async_trait]
impl QueueMetrics for HttpQueueClient {
    async fn query(
        &self,
        status: QueueStatus,
        max_results: usize,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let url = format!("{}/api/v2/process/requirements", self.base_url);
        let mut req = self
            .http
            .get(&url)
            .query(&Self::query_params(status, max_results, selector));
        if let Some(token) = self.token.as_deref() {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let code = resp.status();
        if !code.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status: code.as_u16(),
                body,
            });
        }

        Ok(resp.json().await?)
    }
}
