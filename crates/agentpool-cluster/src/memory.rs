use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use agentpool_common::labels::POOL_NAME_LABEL;

use crate::types::{ClusterClient, ClusterError, ConfigMapInfo, LabelSelector, PodInfo, PodRequest, Result};

/// In-process cluster used for local runs and tests.
///
/// Deleted pods disappear immediately. Deleted config objects can be made to
/// linger for a number of reads to mimic asynchronous garbage collection.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    pods: BTreeMap<String, PodInfo>,
    pod_requests: BTreeMap<String, PodRequest>,
    config_maps: BTreeMap<String, ConfigMapInfo>,
    /// Deleted config objects still visible for N more reads.
    terminating_config_maps: BTreeMap<String, (ConfigMapInfo, u32)>,
    config_map_deletion_lag: u32,
    failing_pools: BTreeSet<String>,
    mutations: u64,
    next_ip: u32,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a pod without counting it as a mutation.
    pub async fn insert_pod(&self, pod: PodInfo) {
        let mut inner = self.inner.write().await;
        inner.pods.insert(pod.name.clone(), pod);
    }

    /// Seeds a config object without counting it as a mutation.
    pub async fn insert_config_map(&self, config_map: ConfigMapInfo) {
        let mut inner = self.inner.write().await;
        inner.config_maps.insert(config_map.name.clone(), config_map);
    }

    pub async fn pods(&self) -> Vec<PodInfo> {
        self.inner.read().await.pods.values().cloned().collect()
    }

    pub async fn pod_request(&self, name: &str) -> Option<PodRequest> {
        self.inner.read().await.pod_requests.get(name).cloned()
    }

    pub async fn config_maps(&self) -> Vec<ConfigMapInfo> {
        self.inner.read().await.config_maps.values().cloned().collect()
    }

    /// Number of create/delete/label calls that changed state.
    pub async fn mutation_count(&self) -> u64 {
        self.inner.read().await.mutations
    }

    /// Keeps deleted config objects visible for `reads` subsequent gets.
    pub async fn set_config_map_deletion_lag(&self, reads: u32) {
        self.inner.write().await.config_map_deletion_lag = reads;
    }

    /// Makes pod listings for `pool_name` fail until [`Self::heal_pool`].
    pub async fn fail_pool(&self, pool_name: &str) {
        self.inner.write().await.failing_pools.insert(pool_name.to_string());
    }

    pub async fn heal_pool(&self, pool_name: &str) {
        self.inner.write().await.failing_pools.remove(pool_name);
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn list_pods(&self, selector: &LabelSelector) -> Result<Vec<PodInfo>> {
        let inner = self.inner.read().await;
        if let Some(pool) = selector.value_of(POOL_NAME_LABEL) {
            if inner.failing_pools.contains(pool) {
                return Err(ClusterError::Api(format!("injected failure listing pods of '{pool}'")));
            }
        }
        Ok(inner
            .pods
            .values()
            .filter(|p| selector.matches(&p.labels))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, name: &str) -> Result<Option<PodInfo>> {
        Ok(self.inner.read().await.pods.get(name).cloned())
    }

    async fn create_pod(&self, pod: &PodRequest) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.pods.contains_key(&pod.name) {
            return Err(ClusterError::AlreadyExists {
                kind: "pod",
                name: pod.name.clone(),
            });
        }

        inner.next_ip += 1;
        let ip = format!("10.0.{}.{}", inner.next_ip / 256, inner.next_ip % 256);
        inner.pods.insert(
            pod.name.clone(),
            PodInfo {
                name: pod.name.clone(),
                labels: pod.labels.clone(),
                ip: Some(ip),
            },
        );
        inner.pod_requests.insert(pod.name.clone(), pod.clone());
        inner.mutations += 1;
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.pods.remove(name).is_none() {
            return Err(ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            });
        }
        inner.pod_requests.remove(name);
        inner.mutations += 1;
        Ok(())
    }

    async fn label_pod(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(pod) = inner.pods.get_mut(name) else {
            return Err(ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            });
        };
        pod.labels.insert(key.to_string(), value.to_string());
        inner.mutations += 1;
        Ok(())
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMapInfo>> {
        let mut inner = self.inner.write().await;
        if let Some(cm) = inner.config_maps.get(name) {
            return Ok(Some(cm.clone()));
        }

        let Some((cm, remaining)) = inner.terminating_config_maps.get_mut(name) else {
            return Ok(None);
        };
        if *remaining == 0 {
            inner.terminating_config_maps.remove(name);
            return Ok(None);
        }
        *remaining -= 1;
        Ok(Some(cm.clone()))
    }

    async fn create_config_map(&self, config_map: &ConfigMapInfo) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.config_maps.contains_key(&config_map.name)
            || inner.terminating_config_maps.contains_key(&config_map.name)
        {
            return Err(ClusterError::AlreadyExists {
                kind: "config map",
                name: config_map.name.clone(),
            });
        }
        inner
            .config_maps
            .insert(config_map.name.clone(), config_map.clone());
        inner.mutations += 1;
        Ok(())
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(cm) = inner.config_maps.remove(name) else {
            return Err(ClusterError::NotFound {
                kind: "config map",
                name: name.to_string(),
            });
        };
        let lag = inner.config_map_deletion_lag;
        if lag > 0 {
            inner.terminating_config_maps.insert(name.to_string(), (cm, lag));
        }
        inner.mutations += 1;
        Ok(())
    }
}
