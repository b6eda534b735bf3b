use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identity of a declared pool resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolMetadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A declared group of agent pods, similar to a K8s ReplicaSet with
/// demand-based autoscaling on top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentPool {
    pub metadata: PoolMetadata,
    pub spec: AgentPoolSpec,
}

impl AgentPool {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolSpec {
    /// Desired number of pods when autoscaling is disabled, and the initial
    /// target otherwise.
    #[serde(default = "default_size")]
    pub size: u32,

    #[serde(default)]
    pub auto_scale: bool,

    #[serde(default = "default_size")]
    pub min_size: u32,

    #[serde(default = "default_size")]
    pub max_size: u32,

    /// Number of pods added or removed by a single autoscaling decision.
    #[serde(default = "default_size_increment")]
    pub size_increment: u32,

    #[serde(default = "default_scale_up_delay_ms")]
    pub scale_up_delay_ms: u64,

    #[serde(default = "default_scale_down_delay_ms")]
    pub scale_down_delay_ms: u64,

    /// `maxResults` used when counting queue entries for this pool.
    #[serde(default = "default_queue_query_limit")]
    pub queue_query_limit: usize,

    /// Selects the process queue entries this pool serves.
    #[serde(default)]
    pub queue_selector: BTreeMap<String, String>,

    /// Pod template. Any change here rolls every pod in the pool.
    #[serde(default = "empty_object")]
    pub pod: serde_json::Value,

    /// Data materialized into the pool's config object.
    #[serde(default)]
    pub config_map: BTreeMap<String, String>,
}

impl Default for AgentPoolSpec {
    fn default() -> Self {
        Self {
            size: default_size(),
            auto_scale: false,
            min_size: default_size(),
            max_size: default_size(),
            size_increment: default_size_increment(),
            scale_up_delay_ms: default_scale_up_delay_ms(),
            scale_down_delay_ms: default_scale_down_delay_ms(),
            queue_query_limit: default_queue_query_limit(),
            queue_selector: BTreeMap::new(),
            pod: empty_object(),
            config_map: BTreeMap::new(),
        }
    }
}

fn default_size() -> u32 {
    1
}

fn default_size_increment() -> u32 {
    1
}

fn default_scale_up_delay_ms() -> u64 {
    15_000
}

fn default_scale_down_delay_ms() -> u64 {
    180_000
}

fn default_queue_query_limit() -> usize {
    1_000
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
