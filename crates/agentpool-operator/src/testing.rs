//! Test doubles shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use agentpool_cluster::PodInfo;
use agentpool_common::labels::{CONFIG_HASH_LABEL, POOL_NAME_LABEL, TRUE_VALUE};
use agentpool_common::{AgentPool, AgentPoolSpec, PoolMetadata};

use crate::agent::{AgentClient, AgentClientFactory, AgentError};
use crate::queue::{QueueEntry, QueueError, QueueMetrics, QueueStatus};

pub fn make_pool(name: &str, spec: AgentPoolSpec) -> Arc<AgentPool> {
    Arc::new(AgentPool {
        metadata: PoolMetadata {
            name: name.to_string(),
            namespace: None,
        },
        spec,
    })
}

/// A live pod of `pool` created from template `hash`, with extra `true` labels.
pub fn pod(name: &str, pool: &str, hash: &str, flags: &[&str]) -> PodInfo {
    let mut labels = BTreeMap::new();
    labels.insert(POOL_NAME_LABEL.to_string(), pool.to_string());
    labels.insert(CONFIG_HASH_LABEL.to_string(), hash.to_string());
    for f in flags {
        labels.insert(f.to_string(), TRUE_VALUE.to_string());
    }
    PodInfo {
        name: name.to_string(),
        labels,
        ip: Some("10.0.0.1".to_string()),
    }
}

#[derive(Debug, Default)]
pub struct FakeAgent {
    busy: AtomicBool,
    failing: AtomicBool,
    maintenance_calls: AtomicUsize,
    busy_calls: AtomicUsize,
}

impl FakeAgent {
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn maintenance_calls(&self) -> usize {
        self.maintenance_calls.load(Ordering::SeqCst)
    }

    pub fn busy_calls(&self) -> usize {
        self.busy_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), AgentError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AgentError::Status {
                status: 503,
                body: "agent unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn enable_maintenance_mode(&self) -> Result<(), AgentError> {
        self.maintenance_calls.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn has_busy_workers(&self) -> Result<bool, AgentError> {
        self.busy_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.busy.load(Ordering::SeqCst))
    }
}

/// Hands out one [`FakeAgent`] per pod name.
#[derive(Debug, Default)]
pub struct FakeAgentFactory {
    agents: Mutex<HashMap<String, Arc<FakeAgent>>>,
}

impl FakeAgentFactory {
    pub fn agent(&self, pod_name: &str) -> Arc<FakeAgent> {
        let mut agents = self.agents.lock().unwrap();
        agents.entry(pod_name.to_string()).or_default().clone()
    }
}

impl AgentClientFactory for FakeAgentFactory {
    fn create(&self, pod: &PodInfo) -> Arc<dyn AgentClient> {
        self.agent(&pod.name)
    }
}

#[derive(Debug, Default)]
pub struct FakeQueue {
    enqueued: AtomicUsize,
    running: AtomicUsize,
    failing: AtomicBool,
    queries: AtomicUsize,
}

impl FakeQueue {
    pub fn with_demand(enqueued: usize, running: usize) -> Self {
        let q = Self::default();
        q.set_demand(enqueued, running);
        q
    }

    pub fn set_demand(&self, enqueued: usize, running: usize) {
        self.enqueued.store(enqueued, Ordering::SeqCst);
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueMetrics for FakeQueue {
    async fn query(
        &self,
        status: QueueStatus,
        max_results: usize,
        _selector: &BTreeMap<String, String>,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Status {
                status: 500,
                body: "queue unavailable".to_string(),
            });
        }

        let count = match status {
            QueueStatus::Enqueued => self.enqueued.load(Ordering::SeqCst),
            QueueStatus::Running => self.running.load(Ordering::SeqCst),
        };
        Ok((0..count.min(max_results))
            .map(|i| QueueEntry {
                instance_id: format!("process-{i}"),
                status: status.as_str().to_string(),
            })
            .collect())
    }
}
