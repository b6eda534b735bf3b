use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use agentpool_cluster::{ClusterClient, ClusterError, LabelSelector, PodInfo};
use agentpool_common::labels::{config_map_name, pod_name, CONFIG_HASH_LABEL, TAGGED_FOR_REMOVAL_LABEL};
use agentpool_common::{ConfigHash, PoolInstance};

use crate::agent::AgentClientFactory;
use crate::change::{Change, ChangeSet};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to read cluster state: {0}")]
    Cluster(#[from] ClusterError),

    #[error("no free pod name for pool '{pool}' ({in_use} names in use)")]
    NameExhausted { pool: String, in_use: usize },
}

/// Diffs live cluster state against a pool and emits the changes that
/// converge it. Reads only; nothing is cached between plans.
pub struct Planner {
    cluster: Arc<dyn ClusterClient>,
    agents: Arc<dyn AgentClientFactory>,
}

impl Planner {
    pub fn new(cluster: Arc<dyn ClusterClient>, agents: Arc<dyn AgentClientFactory>) -> Self {
        Self { cluster, agents }
    }

    pub async fn plan(&self, instance: &PoolInstance) -> Result<ChangeSet, PlanError> {
        let pool_name = instance.name();
        let mut changes = ChangeSet::new();

        // finish in-flight drains before planning anything new
        let tagged = self
            .cluster
            .list_pods(&LabelSelector::pool(pool_name).with_label(TAGGED_FOR_REMOVAL_LABEL))
            .await?;
        for p in &tagged {
            changes.push(self.try_delete(p));
        }

        let pods = self.cluster.list_pods(&LabelSelector::pool(pool_name)).await?;
        let current_size = pods.len();

        let new_hash = ConfigHash::of_spec(&instance.resource().spec);

        let cm_name = config_map_name(pool_name);
        let cm = self.cluster.get_config_map(&cm_name).await?;

        let target_size = instance.effective_target_size() as usize;

        debug!(
            pool = %pool_name,
            current_size,
            target_size,
            config_map = cm.is_some(),
            "plan"
        );

        // a new or replaced config object invalidates every pod mounting it
        let mut recreate_all = false;
        match &cm {
            None if target_size > 0 => {
                changes.push(self.create_config_map(instance, &cm_name, &new_hash));
                recreate_all = true;
            }
            None => {}
            Some(_) if target_size == 0 && current_size == 0 => {
                changes.push(Change::DeleteConfigMap { name: cm_name.clone() });
            }
            Some(existing) if !new_hash.matches(existing.label(CONFIG_HASH_LABEL)) => {
                changes.push(Change::DeleteConfigMap { name: cm_name.clone() });
                changes.push(self.create_config_map(instance, &cm_name, &new_hash));
                recreate_all = true;
            }
            Some(_) => {}
        }

        // rolling update on template drift only, never on a size change;
        // pods already draining are handled by the deletes above
        let untagged: Vec<&PodInfo> = pods.iter().filter(|p| !p.has_label(TAGGED_FOR_REMOVAL_LABEL)).collect();
        let mut tagged_now = HashSet::new();
        for p in &untagged {
            if !new_hash.matches(p.label(CONFIG_HASH_LABEL)) {
                changes.push(self.tag(p));
                tagged_now.insert(p.name.as_str());
            }
        }

        if recreate_all {
            for p in &untagged {
                if tagged_now.insert(p.name.as_str()) {
                    changes.push(self.tag(p));
                }
            }
        }

        if target_size > current_size {
            let mut used: HashSet<String> = pods.iter().map(|p| p.name.clone()).collect();
            for _ in 0..target_size - current_size {
                let name = generate_pod_name(pool_name, &used)?;
                changes.push(Change::CreatePod {
                    pool: instance.resource().clone(),
                    pod_name: name.clone(),
                    config_map_name: cm_name.clone(),
                    config_hash: new_hash.clone(),
                });
                used.insert(name);
            }
        }

        if current_size > target_size {
            let to_remove = current_size - target_size;
            for p in untagged
                .iter()
                .filter(|p| !tagged_now.contains(p.name.as_str()))
                .take(to_remove)
            {
                // optimistic: try to delete right away instead of next tick
                changes.push(self.tag(p));
                changes.push(self.try_delete(p));
            }
        }

        if !changes.is_empty() {
            let summary: Vec<String> = changes.iter().map(Change::to_string).collect();
            info!(pool = %pool_name, changes = ?summary, "plan ready");
        }

        Ok(changes)
    }

    fn create_config_map(&self, instance: &PoolInstance, name: &str, hash: &ConfigHash) -> Change {
        Change::CreateConfigMap {
            pool: instance.resource().clone(),
            name: name.to_string(),
            config_hash: hash.clone(),
        }
    }

    fn tag(&self, pod: &PodInfo) -> Change {
        Change::TagForRemoval {
            pod_name: pod.name.clone(),
            agent: self.agents.create(pod),
        }
    }

    fn try_delete(&self, pod: &PodInfo) -> Change {
        Change::TryDeletePod {
            pod_name: pod.name.clone(),
            agent: self.agents.create(pod),
        }
    }
}

/// First free `<pool>-%05d` name. `0..=used.len()` has one more candidate
/// than there are names in use, so the scan always succeeds; the error arm
/// only guards against that bound being changed.
fn generate_pod_name(pool_name: &str, used: &HashSet<String>) -> Result<String, PlanError> {
    (0..=used.len())
        .map(|i| pod_name(pool_name, i))
        .find(|name| !used.contains(name))
        .ok_or_else(|| PlanError::NameExhausted {
            pool: pool_name.to_string(),
            in_use: used.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeKind;
    use crate::testing::{make_pool, pod, FakeAgentFactory};
    use agentpool_cluster::{ConfigMapInfo, MemoryCluster};
    use agentpool_common::labels::POOL_NAME_LABEL;
    use agentpool_common::{AgentPoolSpec, PoolStatus};

    fn spec(size: u32) -> AgentPoolSpec {
        AgentPoolSpec {
            size,
            pod: serde_json::json!({"containers": [{"name": "agent", "image": "agent:1"}]}),
            ..Default::default()
        }
    }

    fn planner(cluster: &MemoryCluster) -> Planner {
        Planner::new(Arc::new(cluster.clone()), Arc::new(FakeAgentFactory::default()))
    }

    async fn seed_config_map(cluster: &MemoryCluster, pool: &str, hash: &str) {
        cluster
            .insert_config_map(ConfigMapInfo {
                name: config_map_name(pool),
                labels: [
                    (POOL_NAME_LABEL.to_string(), pool.to_string()),
                    (CONFIG_HASH_LABEL.to_string(), hash.to_string()),
                ]
                .into(),
                data: Default::default(),
            })
            .await;
    }

    /// A pool with `size` pods that all match the current template.
    async fn converged(cluster: &MemoryCluster, name: &str, size: u32) -> (PoolInstance, ConfigHash) {
        let instance = PoolInstance::new(make_pool(name, spec(size)), 0);
        let hash = ConfigHash::of_spec(&instance.resource().spec);
        seed_config_map(cluster, name, hash.as_str()).await;
        for i in 0..size as usize {
            cluster.insert_pod(pod(&pod_name(name, i), name, hash.as_str(), &[])).await;
        }
        (instance, hash)
    }

    fn kinds(changes: &ChangeSet) -> Vec<ChangeKind> {
        changes.iter().map(Change::kind).collect()
    }

    #[tokio::test]
    async fn test_converged_pool_plans_nothing() {
        let cluster = MemoryCluster::new();
        let (instance, _) = converged(&cluster, "p", 3).await;
        assert!(planner(&cluster).plan(&instance).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_pool_creates_config_map_then_pods() {
        let cluster = MemoryCluster::new();
        let instance = PoolInstance::new(make_pool("p", spec(2)), 0);
        let changes = planner(&cluster).plan(&instance).await.unwrap();
        assert_eq!(
            kinds(&changes),
            vec![ChangeKind::CreateConfigMap, ChangeKind::CreatePod, ChangeKind::CreatePod]
        );
        assert_eq!(changes[1].target(), "p-00000");
        assert_eq!(changes[2].target(), "p-00001");
    }

    #[tokio::test]
    async fn test_config_drift_recreates_config_map_and_tags_every_pod() {
        let cluster = MemoryCluster::new();
        let instance = PoolInstance::new(make_pool("p", spec(3)), 0);
        seed_config_map(&cluster, "p", "stale").await;
        for i in 0..3 {
            cluster.insert_pod(pod(&pod_name("p", i), "p", "stale", &[])).await;
        }

        let changes = planner(&cluster).plan(&instance).await.unwrap();
        assert_eq!(
            kinds(&changes),
            vec![
                ChangeKind::DeleteConfigMap,
                ChangeKind::CreateConfigMap,
                ChangeKind::TagForRemoval,
                ChangeKind::TagForRemoval,
                ChangeKind::TagForRemoval,
            ]
        );
        let targets: HashSet<&str> = changes[2..].iter().map(Change::target).collect();
        assert_eq!(targets.len(), 3);
    }

    #[tokio::test]
    async fn test_config_map_drift_tags_pods_with_current_hash() {
        let cluster = MemoryCluster::new();
        let (instance, _) = converged(&cluster, "p", 2).await;
        cluster.delete_config_map("p-cfg").await.unwrap();
        seed_config_map(&cluster, "p", "stale").await;

        let changes = planner(&cluster).plan(&instance).await.unwrap();
        assert_eq!(
            kinds(&changes),
            vec![
                ChangeKind::DeleteConfigMap,
                ChangeKind::CreateConfigMap,
                ChangeKind::TagForRemoval,
                ChangeKind::TagForRemoval,
            ]
        );
    }

    #[tokio::test]
    async fn test_pod_drift_tags_only_stale_pods() {
        let cluster = MemoryCluster::new();
        let (instance, _) = converged(&cluster, "p", 2).await;
        cluster.insert_pod(pod("p-00002", "p", "stale", &[])).await;
        let instance = instance.with_scale_decision(3, 0, 0);

        let changes = planner(&cluster).plan(&instance).await.unwrap();
        assert_eq!(kinds(&changes), vec![ChangeKind::TagForRemoval]);
        assert_eq!(changes[0].target(), "p-00002");
    }

    #[tokio::test]
    async fn test_size_change_never_rolls_pods() {
        let cluster = MemoryCluster::new();
        let (instance, _) = converged(&cluster, "p", 2).await;
        let resized = instance.with_scale_decision(4, 0, 0);

        let changes = planner(&cluster).plan(&resized).await.unwrap();
        assert_eq!(kinds(&changes), vec![ChangeKind::CreatePod, ChangeKind::CreatePod]);
    }

    #[tokio::test]
    async fn test_scale_out_fills_gaps_without_collisions() {
        let cluster = MemoryCluster::new();
        let instance = PoolInstance::new(make_pool("p", spec(5)), 0);
        let hash = ConfigHash::of_spec(&instance.resource().spec);
        seed_config_map(&cluster, "p", hash.as_str()).await;
        cluster.insert_pod(pod("p-00001", "p", hash.as_str(), &[])).await;
        cluster.insert_pod(pod("p-00003", "p", hash.as_str(), &[])).await;

        let changes = planner(&cluster).plan(&instance).await.unwrap();
        let names: Vec<&str> = changes.iter().map(Change::target).collect();
        assert_eq!(names, vec!["p-00000", "p-00002", "p-00004"]);
        assert!(changes.iter().all(|c| c.kind() == ChangeKind::CreatePod));
    }

    #[tokio::test]
    async fn test_scale_in_pairs_tag_and_delete() {
        let cluster = MemoryCluster::new();
        let (instance, _) = converged(&cluster, "p", 4).await;
        let smaller = instance.with_scale_decision(1, 0, 0);

        let changes = planner(&cluster).plan(&smaller).await.unwrap();
        assert_eq!(changes.len(), 6);
        for pair in changes.chunks(2) {
            assert_eq!(pair[0].kind(), ChangeKind::TagForRemoval);
            assert_eq!(pair[1].kind(), ChangeKind::TryDeletePod);
            assert_eq!(pair[0].target(), pair[1].target());
        }
        let victims: HashSet<&str> = changes.iter().map(Change::target).collect();
        assert_eq!(victims.len(), 3);
    }

    #[tokio::test]
    async fn test_scale_in_skips_already_tagged_pods() {
        let cluster = MemoryCluster::new();
        let (instance, hash) = converged(&cluster, "p", 2).await;
        cluster
            .insert_pod(pod("p-00000", "p", hash.as_str(), &[TAGGED_FOR_REMOVAL_LABEL]))
            .await;
        let smaller = instance.with_scale_decision(1, 0, 0);

        let changes = planner(&cluster).plan(&smaller).await.unwrap();
        assert_eq!(
            kinds(&changes),
            vec![ChangeKind::TryDeletePod, ChangeKind::TagForRemoval, ChangeKind::TryDeletePod]
        );
        assert_eq!(changes[0].target(), "p-00000");
        assert_eq!(changes[1].target(), "p-00001");
    }

    #[tokio::test]
    async fn test_deleted_pool_drains_then_drops_config_map() {
        let cluster = MemoryCluster::new();
        let (instance, _) = converged(&cluster, "p", 2).await;
        let deleted = instance.with_status(PoolStatus::Deleted);

        let changes = planner(&cluster).plan(&deleted).await.unwrap();
        assert_eq!(
            kinds(&changes),
            vec![
                ChangeKind::TagForRemoval,
                ChangeKind::TryDeletePod,
                ChangeKind::TagForRemoval,
                ChangeKind::TryDeletePod,
            ]
        );

        cluster.delete_pod("p-00000").await.unwrap();
        cluster.delete_pod("p-00001").await.unwrap();
        let changes = planner(&cluster).plan(&deleted).await.unwrap();
        assert_eq!(kinds(&changes), vec![ChangeKind::DeleteConfigMap]);
    }

    #[tokio::test]
    async fn test_zero_sized_pool_without_config_map_plans_nothing() {
        let cluster = MemoryCluster::new();
        let instance = PoolInstance::new(make_pool("p", spec(0)), 0);
        assert!(planner(&cluster).plan(&instance).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_failure_is_fatal() {
        let cluster = MemoryCluster::new();
        cluster.fail_pool("p").await;
        let instance = PoolInstance::new(make_pool("p", spec(1)), 0);
        assert!(matches!(
            planner(&cluster).plan(&instance).await,
            Err(PlanError::Cluster(_))
        ));
    }

    #[test]
    fn test_generate_pod_name() {
        let used: HashSet<String> = ["p-00000", "p-00001"].iter().map(|s| s.to_string()).collect();
        assert_eq!(generate_pod_name("p", &used).unwrap(), "p-00002");
        assert_eq!(generate_pod_name("p", &HashSet::new()).unwrap(), "p-00000");
    }

    #[test]
    fn test_generate_pod_name_ignores_foreign_names() {
        // names outside the numbering count toward the scan bound but block no index
        let used: HashSet<String> = ["p-00000", "x"].iter().map(|s| s.to_string()).collect();
        assert_eq!(generate_pod_name("p", &used).unwrap(), "p-00001");

        let used: HashSet<String> = ["p-00000", "p-00001", "p-00002"].iter().map(|s| s.to_string()).collect();
        assert_eq!(generate_pod_name("p", &used).unwrap(), "p-00003");
    }
}
