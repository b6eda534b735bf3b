use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agentpool_common::labels::POOL_NAME_LABEL;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("invalid {kind} '{name}': {reason}")]
    Invalid {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Exists(String),
    Equals(String, String),
}

/// Equality/existence label selector, rendered in the K8s `labelSelector` syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every object owned by `pool_name`.
    pub fn pool(pool_name: &str) -> Self {
        Self::new().with_value(POOL_NAME_LABEL, pool_name)
    }

    pub fn with_label(mut self, key: &str) -> Self {
        self.requirements.push(Requirement::Exists(key.to_string()));
        self
    }

    pub fn with_value(mut self, key: &str, value: &str) -> Self {
        self.requirements
            .push(Requirement::Equals(key.to_string(), value.to_string()));
        self
    }

    /// Value required for `key`, if the selector pins one.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.requirements.iter().find_map(|r| match r {
            Requirement::Equals(k, v) if k == key => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| match r {
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
        })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match r {
                Requirement::Exists(k) => write!(f, "{k}")?,
                Requirement::Equals(k, v) => write!(f, "{k}={v}")?,
            }
        }
        Ok(())
    }
}

/// The parts of a live pod the operator reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Pod IP once assigned; agent RPC goes here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl PodInfo {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn has_label(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }
}

/// Everything needed to submit a new pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodRequest {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Pod spec as declared on the pool.
    pub template: serde_json::Value,
    /// Config object mounted into the pod.
    pub config_map_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapInfo {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ConfigMapInfo {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Read/write access to the pods and config objects of the operator's namespace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_pods(&self, selector: &LabelSelector) -> Result<Vec<PodInfo>>;
    async fn get_pod(&self, name: &str) -> Result<Option<PodInfo>>;
    async fn create_pod(&self, pod: &PodRequest) -> Result<()>;
    /// Requests deletion; the pod may linger while its pre-stop hook runs.
    async fn delete_pod(&self, name: &str) -> Result<()>;
    async fn label_pod(&self, name: &str, key: &str, value: &str) -> Result<()>;

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMapInfo>>;
    async fn create_config_map(&self, config_map: &ConfigMapInfo) -> Result<()>;
    async fn delete_config_map(&self, name: &str) -> Result<()>;
}
