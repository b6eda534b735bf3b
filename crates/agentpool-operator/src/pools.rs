//! Pool definitions read from local files.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use agentpool_common::AgentPool;

#[derive(Debug, Error)]
pub enum PoolFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unsupported pool file extension: {0} (expected .json, .yaml or .yml)")]
    Unsupported(PathBuf),

    #[error("invalid pool in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
}

/// A file holds either one pool or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<AgentPool>),
    One(Box<AgentPool>),
}

impl From<OneOrMany> for Vec<AgentPool> {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::Many(pools) => pools,
            OneOrMany::One(pool) => vec![*pool],
        }
    }
}

pub fn load_pool_files(paths: &[PathBuf]) -> Result<Vec<AgentPool>, PoolFileError> {
    let mut pools = Vec::new();
    for path in paths {
        pools.extend(load_pool_file(path)?);
    }
    Ok(pools)
}

pub fn load_pool_file(path: &Path) -> Result<Vec<AgentPool>, PoolFileError> {
    let format = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Format::Json,
        Some("yaml") | Some("yml") => Format::Yaml,
        _ => return Err(PoolFileError::Unsupported(path.to_path_buf())),
    };
    let content = std::fs::read_to_string(path).map_err(|source| PoolFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_pools(path, &content, format)
}

fn parse_pools(path: &Path, content: &str, format: Format) -> Result<Vec<AgentPool>, PoolFileError> {
    let parsed: OneOrMany = match format {
        Format::Json => serde_json::from_str(content).map_err(|source| PoolFileError::Json {
            path: path.to_path_buf(),
            source,
        })?,
        Format::Yaml => serde_yaml::from_str(content).map_err(|source| PoolFileError::Yaml {
            path: path.to_path_buf(),
            source,
        })?,
    };

    let pools: Vec<AgentPool> = parsed.into();
    for pool in &pools {
        validate(pool).map_err(|reason| PoolFileError::Invalid {
            path: path.to_path_buf(),
            reason,
        })?;
    }
    Ok(pools)
}

fn validate(pool: &AgentPool) -> Result<(), String> {
    if pool.name().is_empty() {
        return Err("metadata.name must not be empty".to_string());
    }
    let spec = &pool.spec;
    if spec.auto_scale && spec.min_size > spec.max_size {
        return Err(format!(
            "pool '{}': minSize {} exceeds maxSize {}",
            pool.name(),
            spec.min_size,
            spec.max_size
        ));
    }
    if !spec.pod.is_object() {
        return Err(format!("pool '{}': pod template must be an object", pool.name()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p() -> &'static Path {
        Path::new("pools.yaml")
    }

    #[test]
    fn test_parse_single_yaml_pool() {
        let yaml = r#"
metadata:
  name: build-pool
spec:
  autoScale: true
  minSize: 1
  maxSize: 10
  sizeIncrement: 2
  queueSelector:
    agent.flavor: build
  pod:
    containers:
      - name: agent
        image: agent:1
  configMap:
    agent.conf: "workers=4"
"#;
        let pools = parse_pools(p(), yaml, Format::Yaml).unwrap();
        assert_eq!(pools.len(), 1);
        let spec = &pools[0].spec;
        assert_eq!(pools[0].name(), "build-pool");
        assert!(spec.auto_scale);
        assert_eq!(spec.size_increment, 2);
        assert_eq!(spec.queue_selector.get("agent.flavor").map(String::as_str), Some("build"));
        assert_eq!(spec.config_map.len(), 1);
        // unspecified fields take their defaults
        assert_eq!(spec.size, 1);
    }

    #[test]
    fn test_parse_json_list() {
        let json = r#"[
            {"metadata": {"name": "a"}, "spec": {"size": 2}},
            {"metadata": {"name": "b"}, "spec": {}}
        ]"#;
        let pools = parse_pools(Path::new("pools.json"), json, Format::Json).unwrap();
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].spec.size, 2);
        assert_eq!(pools[1].name(), "b");
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let yaml = "metadata: {name: p}\nspec: {autoScale: true, minSize: 5, maxSize: 2}\n";
        let err = parse_pools(p(), yaml, Format::Yaml).unwrap_err();
        assert!(matches!(err, PoolFileError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_empty_name() {
        let yaml = "metadata: {name: ''}\nspec: {}\n";
        assert!(matches!(
            parse_pools(p(), yaml, Format::Yaml),
            Err(PoolFileError::Invalid { .. })
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            load_pool_file(Path::new("pools.toml")),
            Err(PoolFileError::Unsupported(_))
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let path = std::env::temp_dir().join(format!("agentpool-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"metadata": {"name": "disk"}, "spec": {"size": 3}}"#).unwrap();
        let pools = load_pool_files(std::slice::from_ref(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(pools[0].spec.size, 3);
    }
}
