use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

/// Shared metrics for the operator, safe for concurrent access.
#[derive(Debug, Default)]
pub struct SharedMetrics {
    /// Total reconciliation ticks.
    pub ticks_total: AtomicU64,
    /// Ticks that failed as a whole.
    pub tick_errors_total: AtomicU64,
    /// Registered pools (gauge).
    pub pools: AtomicU64,
    /// Per-pool reconciliation failures.
    pub pool_failures_total: AtomicU64,
    pub changes_applied_total: AtomicU64,
    pub changes_skipped_total: AtomicU64,
    pub changes_failed_total: AtomicU64,
    /// Scale-up decisions made.
    pub scale_up_total: AtomicU64,
    /// Scale-down decisions made.
    pub scale_down_total: AtomicU64,
    /// Deleted pools dropped from the registry after draining.
    pub pools_removed_total: AtomicU64,
}

impl SharedMetrics {
    fn render(&self) -> String {
        let series: [(&str, &str, &str, &AtomicU64); 10] = [
            ("ticks_total", "counter", "Reconciliation ticks.", &self.ticks_total),
            ("tick_errors_total", "counter", "Failed reconciliation ticks.", &self.tick_errors_total),
            ("pools", "gauge", "Registered pools.", &self.pools),
            ("pool_failures_total", "counter", "Per-pool reconciliation failures.", &self.pool_failures_total),
            ("changes_applied_total", "counter", "Changes applied to the cluster.", &self.changes_applied_total),
            ("changes_skipped_total", "counter", "Changes skipped (busy or terminating pods).", &self.changes_skipped_total),
            ("changes_failed_total", "counter", "Changes that failed to apply.", &self.changes_failed_total),
            ("scale_up_total", "counter", "Scale-up decisions.", &self.scale_up_total),
            ("scale_down_total", "counter", "Scale-down decisions.", &self.scale_down_total),
            ("pools_removed_total", "counter", "Deleted pools removed after draining.", &self.pools_removed_total),
        ];

        let mut body = String::new();
        for (name, kind, help, value) in series {
            body.push_str(&format!(
                "# HELP agentpool_operator_{name} {help}\n\
                 # TYPE agentpool_operator_{name} {kind}\n\
                 agentpool_operator_{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        body
    }
}

/// GET /metrics: Prometheus text exposition format.
pub async fn metrics_handler(State(metrics): State<Arc<SharedMetrics>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, metrics.render())
}

/// GET /healthz: liveness probe.
pub async fn healthz_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "ok")
}

pub fn router(metrics: Arc<SharedMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_exposition() {
        let m = SharedMetrics::default();
        m.ticks_total.fetch_add(3, Ordering::Relaxed);
        m.pools.store(2, Ordering::Relaxed);

        let body = m.render();
        assert!(body.contains("# TYPE agentpool_operator_ticks_total counter\n"));
        assert!(body.contains("agentpool_operator_ticks_total 3\n"));
        assert!(body.contains("# TYPE agentpool_operator_pools gauge\n"));
        assert!(body.contains("agentpool_operator_pools 2\n"));
        assert!(body.contains("agentpool_operator_pools_removed_total 0\n"));
    }

    #[tokio::test]
    async fn test_metrics_handler_ok() {
        let resp = metrics_handler(State(Arc::new(SharedMetrics::default())))
            .await
            .into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }
}
