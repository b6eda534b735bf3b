use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent_pool::AgentPool;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// The resource was created or updated.
    Modified,
    Deleted,
}

/// A pool resource change delivered by the watch side. Consumed by exactly one tick.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub resource: Arc<AgentPool>,
}

impl Event {
    pub fn new(event_type: EventType, resource: AgentPool) -> Self {
        Self {
            event_type,
            resource: Arc::new(resource),
        }
    }

    pub fn resource_name(&self) -> &str {
        self.resource.name()
    }
}
