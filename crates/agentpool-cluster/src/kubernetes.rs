use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, Pod, PodSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

use crate::types::{ClusterClient, ClusterError, ConfigMapInfo, LabelSelector, PodInfo, PodRequest, Result};

const CONFIG_VOLUME_NAME: &str = "agentpool-cfg";

/// [`ClusterClient`] backed by the Kubernetes API, scoped to one namespace.
#[derive(Clone)]
pub struct KubeCluster {
    pods: Api<Pod>,
    config_maps: Api<ConfigMap>,
    namespace: String,
    config_mount_path: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: &str, config_mount_path: &str) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            config_maps: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            config_mount_path: config_mount_path.to_string(),
        }
    }

    /// Connects using the in-cluster service account or the local kubeconfig.
    pub async fn connect(namespace: &str, config_mount_path: &str) -> Result<Self> {
        let client = Client::try_default().await.map_err(api_error)?;
        Ok(Self::new(client, namespace, config_mount_path))
    }
}

/// Builds the pod object: the pool's pod spec plus the config object
/// mounted into every container.
fn build_pod(namespace: &str, config_mount_path: &str, req: &PodRequest) -> Result<Pod> {
    let mut spec: PodSpec = serde_json::from_value(req.template.clone()).map_err(|e| ClusterError::Invalid {
        kind: "pod",
        name: req.name.clone(),
        reason: e.to_string(),
    })?;

    spec.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: CONFIG_VOLUME_NAME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: req.config_map_name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    });

    for container in &mut spec.containers {
        container.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: config_mount_path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(req.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(req.labels.clone()),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    })
}

fn api_error(e: kube::Error) -> ClusterError {
    ClusterError::Api(e.to_string())
}

/// Maps 404/409 responses onto the typed variants.
fn classify(kind: &'static str, name: &str, e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => ClusterError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        other => api_error(other),
    }
}

fn pod_info(pod: Pod) -> PodInfo {
    PodInfo {
        name: pod.metadata.name.unwrap_or_default(),
        labels: pod.metadata.labels.unwrap_or_default(),
        ip: pod.status.and_then(|s| s.pod_ip),
    }
}

fn config_map_info(cm: ConfigMap) -> ConfigMapInfo {
    ConfigMapInfo {
        name: cm.metadata.name.unwrap_or_default(),
        labels: cm.metadata.labels.unwrap_or_default(),
        data: cm.data.unwrap_or_default(),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_pods(&self, selector: &LabelSelector) -> Result<Vec<PodInfo>> {
        let lp = ListParams::default().labels(&selector.to_string());
        let list = self.pods.list(&lp).await.map_err(api_error)?;
        Ok(list.items.into_iter().map(pod_info).collect())
    }

    async fn get_pod(&self, name: &str) -> Result<Option<PodInfo>> {
        let pod = self.pods.get_opt(name).await.map_err(api_error)?;
        Ok(pod.map(pod_info))
    }

    async fn create_pod(&self, req: &PodRequest) -> Result<()> {
        let pod = build_pod(&self.namespace, &self.config_mount_path, req)?;
        self.pods
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|e| classify("pod", &req.name, e))?;
        debug!(pod = %req.name, "pod created");
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.pods
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify("pod", name, e))?;
        Ok(())
    }

    async fn label_pod(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let patch = json!({ "metadata": { "labels": { key: value } } });
        self.pods
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify("pod", name, e))?;
        Ok(())
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMapInfo>> {
        let cm = self.config_maps.get_opt(name).await.map_err(api_error)?;
        Ok(cm.map(config_map_info))
    }

    async fn create_config_map(&self, config_map: &ConfigMapInfo) -> Result<()> {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(config_map.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(config_map.labels.clone()),
                ..Default::default()
            },
            data: Some(config_map.data.clone()),
            ..Default::default()
        };
        self.config_maps
            .create(&PostParams::default(), &cm)
            .await
            .map_err(|e| classify("config map", &config_map.name, e))?;
        Ok(())
    }

    async fn delete_config_map(&self, name: &str) -> Result<()> {
        self.config_maps
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| classify("config map", name, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(template: serde_json::Value) -> PodRequest {
        PodRequest {
            name: "build-pool-00000".to_string(),
            labels: [("pool-name".to_string(), "build-pool".to_string())].into(),
            template,
            config_map_name: "build-pool-cfg".to_string(),
        }
    }

    #[test]
    fn test_build_pod_mounts_config_map() {
        let req = request(json!({
            "containers": [{"name": "agent", "image": "agent:1"}]
        }));
        let pod = build_pod("ci", "/etc/agentpool", &req).unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("build-pool-00000"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("ci"));

        let spec = pod.spec.unwrap();
        let volumes = spec.volumes.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].config_map.as_ref().unwrap().name, "build-pool-cfg");

        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/etc/agentpool");
    }

    #[test]
    fn test_build_pod_rejects_invalid_template() {
        let err = build_pod("ci", "/etc/agentpool", &request(json!({"containers": "nope"}))).unwrap_err();
        assert!(matches!(err, ClusterError::Invalid { .. }));
    }
}
