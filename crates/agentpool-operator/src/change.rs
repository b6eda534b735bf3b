//! Idempotent cluster mutations produced by the planner.
//!
//! A [`Change`] carries everything it needs to apply itself; the order of a
//! [`ChangeSet`] encodes the dependencies between changes.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use agentpool_cluster::{ClusterClient, ClusterError, ConfigMapInfo, PodRequest};
use agentpool_common::labels::{
    CONFIG_HASH_LABEL, POOL_NAME_LABEL, PRE_STOP_HOOK_TERMINATION_LABEL, TAGGED_FOR_REMOVAL_LABEL, TRUE_VALUE,
};
use agentpool_common::{AgentPool, ConfigHash};

use crate::agent::{AgentClient, AgentError};

pub type ChangeSet = Vec<Change>;

#[derive(Debug, Clone)]
pub enum Change {
    CreateConfigMap {
        pool: Arc<AgentPool>,
        name: String,
        config_hash: ConfigHash,
    },
    DeleteConfigMap {
        name: String,
    },
    CreatePod {
        pool: Arc<AgentPool>,
        pod_name: String,
        config_map_name: String,
        config_hash: ConfigHash,
    },
    /// Puts the pod's agent into maintenance mode, then labels the pod.
    TagForRemoval {
        pod_name: String,
        agent: Arc<dyn AgentClient>,
    },
    /// Deletes the pod once its agent is idle.
    TryDeletePod {
        pod_name: String,
        agent: Arc<dyn AgentClient>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    CreateConfigMap,
    DeleteConfigMap,
    CreatePod,
    TagForRemoval,
    TryDeletePod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The delete request was already issued on an earlier tick.
    AlreadyTerminating,
    /// The agent is still running processes; try again next tick.
    BusyWorkers,
    PodGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied,
    Skipped(SkipReason),
}

#[derive(Debug, Error)]
pub enum ChangeError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("config map '{name}' still present {elapsed:?} after deletion")]
    ConfigMapDeletionTimeout { name: String, elapsed: Duration },
}

/// Bounded exponential backoff for confirming config object deletion.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct ApplyContext {
    pub cluster: Arc<dyn ClusterClient>,
    pub config_map_deletion: RetryPolicy,
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::CreateConfigMap { .. } => ChangeKind::CreateConfigMap,
            Self::DeleteConfigMap { .. } => ChangeKind::DeleteConfigMap,
            Self::CreatePod { .. } => ChangeKind::CreatePod,
            Self::TagForRemoval { .. } => ChangeKind::TagForRemoval,
            Self::TryDeletePod { .. } => ChangeKind::TryDeletePod,
        }
    }

    /// Name of the pod or config object this change acts on.
    pub fn target(&self) -> &str {
        match self {
            Self::CreateConfigMap { name, .. } | Self::DeleteConfigMap { name } => name,
            Self::CreatePod { pod_name, .. }
            | Self::TagForRemoval { pod_name, .. }
            | Self::TryDeletePod { pod_name, .. } => pod_name,
        }
    }

    pub async fn apply(&self, ctx: &ApplyContext) -> Result<ChangeOutcome, ChangeError> {
        let cluster = ctx.cluster.as_ref();
        match self {
            Self::CreateConfigMap {
                pool,
                name,
                config_hash,
            } => create_config_map(cluster, pool, name, config_hash).await,
            Self::DeleteConfigMap { name } => delete_config_map(cluster, name, ctx.config_map_deletion).await,
            Self::CreatePod {
                pool,
                pod_name,
                config_map_name,
                config_hash,
            } => create_pod(cluster, pool, pod_name, config_map_name, config_hash).await,
            Self::TagForRemoval { pod_name, agent } => tag_for_removal(cluster, pod_name, agent.as_ref()).await,
            Self::TryDeletePod { pod_name, agent } => try_delete_pod(cluster, pod_name, agent.as_ref()).await,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind(), self.target())
    }
}

fn pool_labels(pool: &AgentPool, config_hash: &ConfigHash) -> std::collections::BTreeMap<String, String> {
    [
        (POOL_NAME_LABEL.to_string(), pool.name().to_string()),
        (CONFIG_HASH_LABEL.to_string(), config_hash.to_string()),
    ]
    .into()
}

async fn create_config_map(
    cluster: &dyn ClusterClient,
    pool: &AgentPool,
    name: &str,
    config_hash: &ConfigHash,
) -> Result<ChangeOutcome, ChangeError> {
    let cm = ConfigMapInfo {
        name: name.to_string(),
        labels: pool_labels(pool, config_hash),
        data: pool.spec.config_map.clone(),
    };
    cluster.create_config_map(&cm).await?;
    info!(config_map = %name, hash = %config_hash, "config map created");
    Ok(ChangeOutcome::Applied)
}

async fn delete_config_map(
    cluster: &dyn ClusterClient,
    name: &str,
    policy: RetryPolicy,
) -> Result<ChangeOutcome, ChangeError> {
    match cluster.delete_config_map(name).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => debug!(config_map = %name, "config map already gone"),
        Err(e) => return Err(e.into()),
    }

    let started = Instant::now();
    let mut delay = policy.initial_delay;
    loop {
        if cluster.get_config_map(name).await?.is_none() {
            info!(config_map = %name, "config map deleted");
            return Ok(ChangeOutcome::Applied);
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            return Err(ChangeError::ConfigMapDeletionTimeout {
                name: name.to_string(),
                elapsed,
            });
        }

        tokio::time::sleep(delay.min(policy.timeout - elapsed)).await;
        delay = (delay * 2).min(policy.max_delay);
    }
}

async fn create_pod(
    cluster: &dyn ClusterClient,
    pool: &AgentPool,
    pod_name: &str,
    config_map_name: &str,
    config_hash: &ConfigHash,
) -> Result<ChangeOutcome, ChangeError> {
    let req = PodRequest {
        name: pod_name.to_string(),
        labels: pool_labels(pool, config_hash),
        template: pool.spec.pod.clone(),
        config_map_name: config_map_name.to_string(),
    };
    cluster.create_pod(&req).await?;
    info!(pod = %pod_name, pool = %pool.name(), "pod created");
    Ok(ChangeOutcome::Applied)
}

async fn tag_for_removal(
    cluster: &dyn ClusterClient,
    pod_name: &str,
    agent: &dyn AgentClient,
) -> Result<ChangeOutcome, ChangeError> {
    // the label is only a promise that the agent stopped taking work
    agent.enable_maintenance_mode().await?;
    cluster
        .label_pod(pod_name, TAGGED_FOR_REMOVAL_LABEL, TRUE_VALUE)
        .await?;
    info!(pod = %pod_name, "pod tagged for removal");
    Ok(ChangeOutcome::Applied)
}

async fn try_delete_pod(
    cluster: &dyn ClusterClient,
    pod_name: &str,
    agent: &dyn AgentClient,
) -> Result<ChangeOutcome, ChangeError> {
    let Some(pod) = cluster.get_pod(pod_name).await? else {
        return Ok(ChangeOutcome::Skipped(SkipReason::PodGone));
    };

    if pod.has_label(PRE_STOP_HOOK_TERMINATION_LABEL) {
        debug!(pod = %pod_name, "pod is already terminating");
        return Ok(ChangeOutcome::Skipped(SkipReason::AlreadyTerminating));
    }

    if agent.has_busy_workers().await? {
        debug!(pod = %pod_name, "pod has busy workers, will retry");
        return Ok(ChangeOutcome::Skipped(SkipReason::BusyWorkers));
    }

    match cluster.delete_pod(pod_name).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(ChangeOutcome::Skipped(SkipReason::PodGone)),
        Err(e) => return Err(e.into()),
    }

    // the pre-stop hook drives the teardown from here
    match cluster
        .label_pod(pod_name, PRE_STOP_HOOK_TERMINATION_LABEL, TRUE_VALUE)
        .await
    {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    info!(pod = %pod_name, "pod deletion requested");
    Ok(ChangeOutcome::Applied)
}
