pub mod agent_pool;
pub mod event;
pub mod hash;
pub mod labels;
pub mod pool_instance;
pub mod util;

pub use agent_pool::{AgentPool, AgentPoolSpec, PoolMetadata};
pub use event::{Event, EventType};
pub use hash::ConfigHash;
pub use pool_instance::{PoolInstance, PoolStatus};

pub mod telemetry;
