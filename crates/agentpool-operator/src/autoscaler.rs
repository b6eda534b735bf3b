//! Linear queue-driven autoscaling.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use agentpool_cluster::{ClusterClient, ClusterError, LabelSelector};
use agentpool_common::util::now_ms;
use agentpool_common::PoolInstance;

use crate::queue::{QueueError, QueueMetrics, QueueStatus};

#[derive(Debug, Error)]
pub enum AutoScaleError {
    #[error("failed to count pool pods: {0}")]
    Cluster(#[from] ClusterError),

    #[error("failed to query process queue: {0}")]
    Queue(#[from] QueueError),
}

/// Adjusts a pool's target size by `sizeIncrement` steps based on how many
/// processes are waiting versus how many pods are idle.
pub struct AutoScaler {
    cluster: Arc<dyn ClusterClient>,
    queue: Arc<dyn QueueMetrics>,
}

impl AutoScaler {
    pub fn new(cluster: Arc<dyn ClusterClient>, queue: Arc<dyn QueueMetrics>) -> Self {
        Self { cluster, queue }
    }

    pub async fn apply(&self, instance: &PoolInstance) -> Result<PoolInstance, AutoScaleError> {
        self.apply_at(instance, now_ms()).await
    }

    pub async fn apply_at(&self, instance: &PoolInstance, now: u64) -> Result<PoolInstance, AutoScaleError> {
        let spec = &instance.resource().spec;
        let pool = instance.name();

        let can_scale_up = now.saturating_sub(instance.last_scale_up_at()) > spec.scale_up_delay_ms;
        let can_scale_down = now.saturating_sub(instance.last_scale_down_at()) > spec.scale_down_delay_ms;
        if !can_scale_up && !can_scale_down {
            debug!(pool = %pool, "autoscale: within delay window, skipping");
            return Ok(instance.clone());
        }

        let limit = spec.queue_query_limit;
        let enqueued = self
            .queue
            .query(QueueStatus::Enqueued, limit, &spec.queue_selector)
            .await?
            .len() as i64;
        let running = self
            .queue
            .query(QueueStatus::Running, limit, &spec.queue_selector)
            .await?
            .len() as i64;
        let pods = self.cluster.list_pods(&LabelSelector::pool(pool)).await?.len() as i64;
        let free = (pods - running).max(0);

        let step = spec.size_increment as i64;
        let increment = match enqueued.cmp(&free) {
            std::cmp::Ordering::Greater => step,
            std::cmp::Ordering::Less => -step,
            std::cmp::Ordering::Equal => 0,
        };

        let (mut up_at, mut down_at) = (instance.last_scale_up_at(), instance.last_scale_down_at());
        if increment > 0 {
            up_at = now;
            down_at = now;
        } else if increment < 0 {
            down_at = now;
        }

        let current = instance.target_size() as i64;
        let mut target = (pods + increment).max(spec.min_size as i64);

        info!(
            pool = %pool,
            pods,
            enqueued,
            running,
            free,
            current_target = current,
            proposed = target,
            "autoscale"
        );

        if target == current {
            return Ok(instance.clone());
        }
        if target > current && !can_scale_up {
            debug!(pool = %pool, "autoscale: scale-up delay not elapsed");
            return Ok(instance.clone());
        }
        if target < current && !can_scale_down {
            debug!(pool = %pool, "autoscale: scale-down delay not elapsed");
            return Ok(instance.clone());
        }

        let max = spec.max_size.max(spec.min_size) as i64;
        if target > max {
            warn!(pool = %pool, target, max_size = max, "autoscale: target exceeds max size, clamping");
            target = max;
        }

        info!(pool = %pool, from = current, to = target, "autoscale: target size updated");
        Ok(instance.with_scale_decision(target as u32, up_at, down_at))
    }
}
