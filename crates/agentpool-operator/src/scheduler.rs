//! The reconciliation loop: drains pool events into the registry, then
//! autoscales, plans and applies changes for every registered pool.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use agentpool_cluster::{ClusterClient, ClusterError, LabelSelector};
use agentpool_common::labels::config_map_name;
use agentpool_common::util::now_ms;
use agentpool_common::{AgentPool, Event, EventType, PoolInstance, PoolStatus};

use crate::agent::AgentClientFactory;
use crate::autoscaler::{AutoScaleError, AutoScaler};
use crate::change::{ApplyContext, ChangeError, ChangeKind, ChangeOutcome, RetryPolicy};
use crate::metrics::SharedMetrics;
use crate::planner::{PlanError, Planner};
use crate::queue::QueueMetrics;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Sleep after a failed tick.
    pub error_delay: Duration,
    pub max_concurrent_pools: usize,
    pub config_map_deletion: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            error_delay: Duration::from_secs(30),
            max_concurrent_pools: 8,
            config_map_deletion: RetryPolicy::default(),
        }
    }
}

/// Failure of one pool's reconciliation. Never affects other pools.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("autoscaling failed: {0}")]
    AutoScale(#[from] AutoScaleError),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("cluster query failed: {0}")]
    Cluster(#[from] ClusterError),

    /// Pods must not be created against a stale config object, so the rest of
    /// the change set is dropped.
    #[error("config map change failed, remaining changes dropped: {0}")]
    ConfigMap(#[source] ChangeError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub events: usize,
    pub pools_processed: usize,
    pub pools_failed: usize,
    pub pools_removed: usize,
    pub changes_applied: usize,
    pub changes_skipped: usize,
    pub changes_failed: usize,
}

impl TickReport {
    fn is_quiet(&self) -> bool {
        self.events == 0
            && self.pools_failed == 0
            && self.pools_removed == 0
            && self.changes_applied == 0
            && self.changes_failed == 0
    }
}

/// Counts survive a pool error so changes applied before it are still reported.
#[derive(Debug, Default)]
struct PoolReport {
    applied: usize,
    skipped: usize,
    failed: usize,
    removed: bool,
    error: Option<PoolError>,
}

pub struct Scheduler {
    registry: DashMap<String, PoolInstance>,
    events: Mutex<Vec<Event>>,
    cluster: Arc<dyn ClusterClient>,
    planner: Planner,
    autoscaler: AutoScaler,
    apply: ApplyContext,
    metrics: Arc<SharedMetrics>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        agents: Arc<dyn AgentClientFactory>,
        queue: Arc<dyn QueueMetrics>,
        config: SchedulerConfig,
        metrics: Arc<SharedMetrics>,
    ) -> Self {
        Self {
            registry: DashMap::new(),
            events: Mutex::new(Vec::new()),
            planner: Planner::new(cluster.clone(), agents),
            autoscaler: AutoScaler::new(cluster.clone(), queue),
            apply: ApplyContext {
                cluster: cluster.clone(),
                config_map_deletion: config.config_map_deletion,
            },
            cluster,
            metrics,
            config,
        }
    }

    /// Queues a pool event for the next tick. Never blocks on I/O.
    pub fn on_event(&self, event_type: EventType, resource: AgentPool) {
        let event = Event::new(event_type, resource);
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    pub fn get(&self, name: &str) -> Option<PoolInstance> {
        self.registry.get(name).map(|e| e.value().clone())
    }

    pub fn registry_snapshot(&self) -> Vec<PoolInstance> {
        let mut pools: Vec<PoolInstance> = self.registry.iter().map(|e| e.value().clone()).collect();
        pools.sort_by(|a, b| a.name().cmp(b.name()));
        pools
    }

    pub fn metrics(&self) -> &Arc<SharedMetrics> {
        &self.metrics
    }

    /// Runs ticks until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            error_delay_secs = self.config.error_delay.as_secs(),
            max_concurrent_pools = self.config.max_concurrent_pools,
            "scheduler started"
        );

        loop {
            let delay = match self.tick().await {
                Ok(report) => {
                    if report.is_quiet() {
                        debug!(pools = report.pools_processed, "tick complete");
                    } else {
                        info!(
                            events = report.events,
                            pools = report.pools_processed,
                            pools_failed = report.pools_failed,
                            pools_removed = report.pools_removed,
                            applied = report.changes_applied,
                            skipped = report.changes_skipped,
                            failed = report.changes_failed,
                            "tick complete"
                        );
                    }
                    self.config.poll_interval
                }
                Err(e) => {
                    self.metrics.tick_errors_total.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "tick failed");
                    self.config.error_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }

    pub async fn tick(&self) -> anyhow::Result<TickReport> {
        self.tick_at(now_ms()).await
    }

    /// One reconciliation pass with a caller-supplied clock.
    pub async fn tick_at(&self, now: u64) -> anyhow::Result<TickReport> {
        self.metrics.ticks_total.fetch_add(1, Ordering::Relaxed);

        let events = {
            let mut queue = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *queue)
        };

        let mut report = TickReport {
            events: events.len(),
            ..Default::default()
        };
        for event in events {
            self.apply_event(event, now);
        }

        let todo: Vec<PoolInstance> = self.registry.iter().map(|e| e.value().clone()).collect();
        report.pools_processed = todo.len();

        let results: Vec<(String, PoolReport)> = futures_util::stream::iter(todo)
            .map(|instance| async move {
                let name = instance.name().to_string();
                let pool_report = self.process_pool(instance, now).await;
                (name, pool_report)
            })
            .buffer_unordered(self.config.max_concurrent_pools.max(1))
            .collect()
            .await;

        for (name, r) in results {
            report.changes_applied += r.applied;
            report.changes_skipped += r.skipped;
            report.changes_failed += r.failed;
            if r.removed {
                report.pools_removed += 1;
            }
            if let Some(e) = r.error {
                report.pools_failed += 1;
                self.metrics.pool_failures_total.fetch_add(1, Ordering::Relaxed);
                error!(pool = %name, error = %e, applied = r.applied, "error while processing pool");
            }
        }

        self.metrics.pools.store(self.registry.len() as u64, Ordering::Relaxed);
        Ok(report)
    }

    fn apply_event(&self, event: Event, now: u64) {
        let name = event.resource_name().to_string();
        match event.event_type {
            EventType::Modified => {
                let next = match self.registry.get(&name) {
                    Some(existing) => existing.with_resource(event.resource),
                    None => PoolInstance::new(event.resource, now),
                };
                info!(pool = %name, target_size = next.target_size(), "pool registered");
                self.registry.insert(name, next);
            }
            EventType::Deleted => {
                if let Some(mut entry) = self.registry.get_mut(&name) {
                    *entry = entry.with_status(PoolStatus::Deleted);
                    info!(pool = %name, "pool marked as deleted");
                }
            }
        }
    }

    async fn process_pool(&self, instance: PoolInstance, now: u64) -> PoolReport {
        let mut report = PoolReport::default();
        if let Err(e) = self.reconcile_pool(instance, now, &mut report).await {
            report.error = Some(e);
        }
        report
    }

    async fn reconcile_pool(
        &self,
        mut instance: PoolInstance,
        now: u64,
        report: &mut PoolReport,
    ) -> Result<(), PoolError> {
        let name = instance.name().to_string();

        if !instance.is_deleted() && instance.resource().spec.auto_scale {
            let scaled = self.autoscaler.apply_at(&instance, now).await?;
            if scaled.target_size() > instance.target_size() {
                self.metrics.scale_up_total.fetch_add(1, Ordering::Relaxed);
            } else if scaled.target_size() < instance.target_size() {
                self.metrics.scale_down_total.fetch_add(1, Ordering::Relaxed);
            }
            if scaled != instance {
                if let Some(mut entry) = self.registry.get_mut(&name) {
                    *entry = scaled.clone();
                }
                instance = scaled;
            }
        }

        let changes = self.planner.plan(&instance).await?;

        for change in &changes {
            match change.apply(&self.apply).await {
                Ok(ChangeOutcome::Applied) => {
                    report.applied += 1;
                    self.metrics.changes_applied_total.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ChangeOutcome::Skipped(reason)) => {
                    report.skipped += 1;
                    self.metrics.changes_skipped_total.fetch_add(1, Ordering::Relaxed);
                    debug!(pool = %name, change = %change, ?reason, "change skipped");
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.changes_failed_total.fetch_add(1, Ordering::Relaxed);
                    if matches!(change.kind(), ChangeKind::CreateConfigMap | ChangeKind::DeleteConfigMap) {
                        return Err(PoolError::ConfigMap(e));
                    }
                    warn!(pool = %name, change = %change, error = %e, "change failed, will retry next tick");
                }
            }
        }

        if instance.is_deleted() {
            report.removed = self.remove_if_drained(&name).await?;
        }

        Ok(())
    }

    /// Drops a deleted pool once neither pods nor its config object remain.
    async fn remove_if_drained(&self, name: &str) -> Result<bool, PoolError> {
        let pods = self.cluster.list_pods(&LabelSelector::pool(name)).await?;
        if !pods.is_empty() {
            info!(pool = %name, remaining = pods.len(), "deleted pool still has pods, will retry next tick");
            return Ok(false);
        }
        if self.cluster.get_config_map(&config_map_name(name)).await?.is_some() {
            debug!(pool = %name, "deleted pool has no pods left, config map pending removal");
            return Ok(false);
        }

        // a MODIFIED event may have revived the pool since this tick's snapshot
        let removed = self
            .registry
            .remove_if(name, |_, current| current.is_deleted())
            .is_some();
        if removed {
            self.metrics.pools_removed_total.fetch_add(1, Ordering::Relaxed);
            info!(pool = %name, "no pods left, the pool was removed");
        }
        Ok(removed)
    }
}
