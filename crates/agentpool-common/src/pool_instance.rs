use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent_pool::AgentPool;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    Active,
    /// Tombstone: the resource is gone but its pods may still be draining.
    Deleted,
}

/// Immutable snapshot of one pool's desired and runtime state.
///
/// Every transition returns a new value; the registry swaps whole entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolInstance {
    name: String,
    resource: Arc<AgentPool>,
    status: PoolStatus,
    target_size: u32,
    last_scale_up_at: u64,
    last_scale_down_at: u64,
    created_at: u64,
}

impl PoolInstance {
    /// A freshly registered pool: active, sized from the spec, all clocks at `now_ms`.
    pub fn new(resource: Arc<AgentPool>, now_ms: u64) -> Self {
        Self {
            name: resource.name().to_string(),
            target_size: resource.spec.size,
            resource,
            status: PoolStatus::Active,
            last_scale_up_at: now_ms,
            last_scale_down_at: now_ms,
            created_at: now_ms,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &Arc<AgentPool> {
        &self.resource
    }

    pub fn status(&self) -> PoolStatus {
        self.status
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    pub fn last_scale_up_at(&self) -> u64 {
        self.last_scale_up_at
    }

    pub fn last_scale_down_at(&self) -> u64 {
        self.last_scale_down_at
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn is_deleted(&self) -> bool {
        self.status == PoolStatus::Deleted
    }

    /// Size the planner should converge to. Deleted pools always drain to zero.
    pub fn effective_target_size(&self) -> u32 {
        match self.status {
            PoolStatus::Active => self.target_size,
            PoolStatus::Deleted => 0,
        }
    }

    pub fn with_status(&self, status: PoolStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    pub fn with_scale_decision(&self, target_size: u32, last_scale_up_at: u64, last_scale_down_at: u64) -> Self {
        Self {
            target_size,
            last_scale_up_at,
            last_scale_down_at,
            ..self.clone()
        }
    }

    /// Applies an updated resource definition to a registered pool.
    ///
    /// The pool becomes active again and picks up the new spec. For autoscaled
    /// pools the runtime target and scale timestamps survive the update (the
    /// target is clamped into the new bounds) so hysteresis is not reset by
    /// unrelated spec edits. Fixed-size pools follow `spec.size`.
    pub fn with_resource(&self, resource: Arc<AgentPool>) -> Self {
        let spec = &resource.spec;
        let target_size = if spec.auto_scale {
            self.target_size.clamp(spec.min_size, spec.max_size.max(spec.min_size))
        } else {
            spec.size
        };

        Self {
            name: self.name.clone(),
            target_size,
            resource,
            status: PoolStatus::Active,
            last_scale_up_at: self.last_scale_up_at,
            last_scale_down_at: self.last_scale_down_at,
            created_at: self.created_at,
        }
    }
}
