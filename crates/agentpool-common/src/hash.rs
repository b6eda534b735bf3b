use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::agent_pool::AgentPoolSpec;

/// Deterministic digest of a pool template, stored as a label value on pods
/// and config objects to detect drift without diffing full specs.
///
/// Hex only, so it is always a valid label value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHash(String);

impl ConfigHash {
    /// Hash of everything that requires pods to be recreated: the pod
    /// template and the config object data. Size fields are not included.
    pub fn of_spec(spec: &AgentPoolSpec) -> Self {
        let config_map = spec
            .config_map
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect::<serde_json::Map<_, _>>();

        let template = serde_json::json!({
            "pod": spec.pod,
            "configMap": config_map,
        });

        Self::from_json(&template)
    }

    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a label value read back from the cluster.
    pub fn matches(&self, label: Option<&str>) -> bool {
        label == Some(self.0.as_str())
    }
}

impl std::fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sorted keys, no whitespace.
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", serde_json::Value::String((*k).clone()), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}
