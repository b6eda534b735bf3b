//! Pod labels and resource names shared with the draining side.
//!
//! These strings are a wire contract: the agent's pre-stop hook and any
//! external tooling match on them verbatim.

/// Owning pool of a pod or config object.
pub const POOL_NAME_LABEL: &str = "pool-name";

/// Hash of the pool template a pod was created from.
pub const CONFIG_HASH_LABEL: &str = "config-hash";

/// Set once the pod's agent is in maintenance mode and the pod awaits deletion.
pub const TAGGED_FOR_REMOVAL_LABEL: &str = "tagged-for-removal";

/// Set once the delete request was issued; the pre-stop hook owns the pod from here.
pub const PRE_STOP_HOOK_TERMINATION_LABEL: &str = "pre-stop-hook-termination";

pub const TRUE_VALUE: &str = "true";

pub fn config_map_name(pool_name: &str) -> String {
    format!("{pool_name}-cfg")
}

pub fn pod_name(pool_name: &str, index: usize) -> String {
    format!("{pool_name}-{index:05}")
}
