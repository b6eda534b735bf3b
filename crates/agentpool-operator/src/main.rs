mod args;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use agentpool_cluster::{ClusterClient, KubeCluster, MemoryCluster};
use agentpool_common::telemetry::{init_tracing, TelemetryConfig};
use agentpool_common::EventType;
use agentpool_operator::agent::HttpAgentClientFactory;
use agentpool_operator::change::RetryPolicy;
use agentpool_operator::metrics::{self, SharedMetrics};
use agentpool_operator::pools::load_pool_files;
use agentpool_operator::queue::HttpQueueClient;
use agentpool_operator::{Scheduler, SchedulerConfig};

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel = init_tracing(&TelemetryConfig {
        service_name: "agentpool-operator",
        service_version: env!("CARGO_PKG_VERSION"),
        namespace: Some(&args.namespace),
        otlp_endpoint: args.otlp_endpoint.as_deref(),
        otlp_token: args.otlp_token.as_deref(),
    });

    let pools = load_pool_files(&args.pool_files)?;
    info!(pools = pools.len(), namespace = %args.namespace, "agentpool-operator starting");

    let cluster: Arc<dyn ClusterClient> = if args.in_memory {
        warn!("using in-memory cluster, nothing will be scheduled");
        Arc::new(MemoryCluster::new())
    } else {
        Arc::new(KubeCluster::connect(&args.namespace, &args.config_mount_path).await?)
    };

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .timeout(Duration::from_secs(args.request_timeout_secs))
        .build()?;

    if !args.use_maintenance_mode {
        info!("maintenance mode disabled, pods are removed without draining");
    }
    let agents = Arc::new(HttpAgentClientFactory::new(
        http.clone(),
        args.agent_port,
        args.use_maintenance_mode,
    ));
    let queue = Arc::new(HttpQueueClient::new(http, &args.queue_url, args.queue_token.clone()));

    let config = SchedulerConfig {
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        error_delay: Duration::from_secs(args.error_delay_secs),
        max_concurrent_pools: args.max_concurrent_pools,
        config_map_deletion: RetryPolicy {
            timeout: Duration::from_secs(args.config_map_deletion_timeout_secs),
            ..RetryPolicy::default()
        },
    };
    let metrics = Arc::new(SharedMetrics::default());
    let scheduler = Arc::new(Scheduler::new(cluster, agents, queue, config, metrics.clone()));

    for pool in pools {
        scheduler.on_event(EventType::Modified, pool);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::net::TcpListener::bind(&args.metrics_listen_addr).await?;
    info!(addr = %args.metrics_listen_addr, "metrics listening");
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, metrics::router(metrics))
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    let worker = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = worker.await {
        warn!(error = %e, "scheduler task failed");
    }
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "metrics server failed"),
        Err(e) => warn!(error = %e, "metrics server task failed"),
        Ok(Ok(())) => {}
    }

    if let Some(provider) = otel {
        if let Err(e) = provider.shutdown() {
            warn!(error = %e, "failed to flush traces");
        }
    }
    Ok(())
}
