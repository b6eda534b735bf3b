pub mod kubernetes;
pub mod memory;
pub mod types;

pub use kubernetes::KubeCluster;
pub use memory::MemoryCluster;
pub use types::{ClusterClient, ClusterError, ConfigMapInfo, LabelSelector, PodInfo, PodRequest, Result};
