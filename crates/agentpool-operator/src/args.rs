use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "agentpool-operator", about = "Reconciles agent pools against the cluster")]
pub struct Args {
    /// Namespace the pool pods and config maps live in.
    #[arg(long, env = "AGENTPOOL_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Reconcile against an in-process cluster instead of Kubernetes.
    #[arg(long)]
    pub in_memory: bool,

    /// Base URL of the process queue API.
    #[arg(long, env = "QUEUE_API_URL", default_value = "http://localhost:8001")]
    pub queue_url: String,

    /// Bearer token for the process queue API.
    #[arg(long, env = "QUEUE_API_TOKEN")]
    pub queue_token: Option<String>,

    #[arg(long, env = "AGENT_PORT", default_value_t = 8010)]
    pub agent_port: u16,

    /// Put agents into maintenance mode before removing their pods.
    #[arg(long, env = "USE_MAINTENANCE_MODE", default_value_t = true, action = clap::ArgAction::Set)]
    pub use_maintenance_mode: bool,

    /// Timeout for agent and queue HTTP requests.
    #[arg(long, default_value_t = 10)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 10)]
    pub poll_interval_secs: u64,

    /// Sleep after a failed tick.
    #[arg(long, env = "ERROR_DELAY_SECS", default_value_t = 30)]
    pub error_delay_secs: u64,

    #[arg(long, default_value_t = 8)]
    pub max_concurrent_pools: usize,

    /// Give up waiting for a deleted config map after this long.
    #[arg(long, default_value_t = 60)]
    pub config_map_deletion_timeout_secs: u64,

    #[arg(long, env = "METRICS_LISTEN_ADDR", default_value = "0.0.0.0:9090")]
    pub metrics_listen_addr: String,

    /// Where the pool config map is mounted inside agent containers.
    #[arg(long, default_value = "/opt/agent/conf")]
    pub config_mount_path: String,

    /// OTLP/HTTP endpoint for trace export (e.g. "http://collector:4318/v1/traces").
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,

    /// Pool definition files (.json, .yaml or .yml), each holding one pool or a list.
    #[arg(long = "pool-file", value_name = "PATH")]
    pub pool_files: Vec<PathBuf>,
}
