//! Per-pod agent RPC: maintenance mode and busy-worker checks.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use agentpool_cluster::PodInfo;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("pod '{0}' has no IP address yet")]
    NoAddress(String),

    #[error("agent request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Client for the agent running inside one pod.
#[async_trait]
pub trait AgentClient: Send + Sync + Debug {
    /// Stops the agent from taking new work. Idempotent on the agent side.
    async fn enable_maintenance_mode(&self) -> Result<(), AgentError>;

    /// Whether any worker is still running a process.
    async fn has_busy_workers(&self) -> Result<bool, AgentError>;
}

pub trait AgentClientFactory: Send + Sync {
    fn create(&self, pod: &PodInfo) -> Arc<dyn AgentClient>;
}

/// Used when maintenance mode is disabled: pods are never considered busy.
#[derive(Debug, Default)]
pub struct NoopAgentClient;

#[async_trait]
impl AgentClient for NoopAgentClient {
    async fn enable_maintenance_mode(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn has_busy_workers(&self) -> Result<bool, AgentError> {
        Ok(false)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaintenanceModeStatus {
    #[serde(default)]
    workers_alive: u64,
}

#[derive(Debug)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    pod_name: String,
    /// `None` until the pod has an IP.
    url: Option<String>,
}

impl HttpAgentClient {
    pub fn new(http: reqwest::Client, pod: &PodInfo, port: u16) -> Self {
        Self {
            http,
            pod_name: pod.name.clone(),
            url: pod
                .ip
                .as_ref()
                .map(|ip| format!("http://{ip}:{port}/maintenance-mode")),
        }
    }

    fn url(&self) -> Result<&str, AgentError> {
        self.url
            .as_deref()
            .ok_or_else(|| AgentError::NoAddress(self.pod_name.clone()))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, AgentError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(AgentError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn enable_maintenance_mode(&self) -> Result<(), AgentError> {
        let resp = self.http.post(self.url()?).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn has_busy_workers(&self) -> Result<bool, AgentError> {
        let resp = self.http.get(self.url()?).send().await?;
        let status: MaintenanceModeStatus = Self::check(resp).await?.json().await?;
        Ok(status.workers_alive > 0)
    }
}

pub struct HttpAgentClientFactory {
    http: reqwest::Client,
    port: u16,
    use_maintenance_mode: bool,
}

impl HttpAgentClientFactory {
    pub fn new(http: reqwest::Client, port: u16, use_maintenance_mode: bool) -> Self {
        Self {
            http,
            port,
            use_maintenance_mode,
        }
    }
}

impl AgentClientFactory for HttpAgentClientFactory {
    fn create(&self, pod: &PodInfo) -> Arc<dyn AgentClient> {
        if !self.use_maintenance_mode {
            return Arc::new(NoopAgentClient);
        }
        Arc::new(HttpAgentClient::new(self.http.clone(), pod, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(ip: Option<&str>) -> PodInfo {
        PodInfo {
            name: "p-00000".to_string(),
            labels: Default::default(),
            ip: ip.map(str::to_string),
        }
    }

    #[test]
    fn test_status_parsing() {
        let s: MaintenanceModeStatus = serde_json::from_str(r#"{"maintenanceMode":true,"workersAlive":2}"#).unwrap();
        assert_eq!(s.workers_alive, 2);
        let s: MaintenanceModeStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(s.workers_alive, 0);
    }

    #[test]
    fn test_url_from_pod_ip() {
        let c = HttpAgentClient::new(reqwest::Client::new(), &pod(Some("10.1.2.3")), 8010);
        assert_eq!(c.url().unwrap(), "http://10.1.2.3:8010/maintenance-mode");
    }

    #[tokio::test]
    async fn test_missing_ip_is_an_error() {
        let c = HttpAgentClient::new(reqwest::Client::new(), &pod(None), 8010);
        assert!(matches!(c.has_busy_workers().await, Err(AgentError::NoAddress(_))));
        assert!(matches!(c.enable_maintenance_mode().await, Err(AgentError::NoAddress(_))));
    }

    #[tokio::test]
    async fn test_noop_client_when_maintenance_mode_disabled() {
        let f = HttpAgentClientFactory::new(reqwest::Client::new(), 8010, false);
        let c = f.create(&pod(None));
        c.enable_maintenance_mode().await.unwrap();
        assert!(!c.has_busy_workers().await.unwrap());
    }
}
