//! Kubernetes API adapter

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::path::Path;
use tracing::{debug, info};

use super::ClusterControlPlane;
use crate::error::{Result, ScalerError};
use crate::models::{PodInfo, ScalingTarget, WorkloadKind, WorkloadRef, WorkloadStatus};

const FIELD_MANAGER: &str = "workload-scaler";

/// Build a client from an explicit kubeconfig and/or context, or infer one
pub async fn connect(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Client> {
    let options = KubeConfigOptions {
        context: context.map(str::to_string),
        ..Default::default()
    };

    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                ScalerError::validation(format!("failed to read {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| ScalerError::validation(format!("invalid kubeconfig: {}", e)))?
        }
        None if context.is_some() => Config::from_kubeconfig(&options)
            .await
            .map_err(|e| ScalerError::validation(format!("invalid kubeconfig: {}", e)))?,
        None => Config::infer()
            .await
            .map_err(|e| ScalerError::validation(format!("no cluster configuration: {}", e)))?,
    };

    Ok(Client::try_from(config)?)
}

/// Render a label selector in `kubectl -l` syntax; `None` when it selects nothing
pub fn selector_string(selector: &LabelSelector) -> Option<String> {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    for expr in selector.match_expressions.iter().flatten() {
        let values = expr.values.clone().unwrap_or_default().join(",");
        let term = match expr.operator.as_str() {
            "In" => format!("{} in ({})", expr.key, values),
            "NotIn" => format!("{} notin ({})", expr.key, values),
            "Exists" => expr.key.clone(),
            "DoesNotExist" => format!("!{}", expr.key),
            _ => continue,
        };
        terms.push(term);
    }

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(","))
    }
}

fn to_u32(value: Option<i32>) -> u32 {
    value.map(|v| v.max(0) as u32).unwrap_or(0)
}

fn deployment_status(d: &Deployment) -> WorkloadStatus {
    let spec = d.spec.as_ref();
    WorkloadStatus {
        replicas: spec.and_then(|s| s.replicas).map_or(1, |r| r.max(0) as u32),
        ready_replicas: to_u32(d.status.as_ref().and_then(|s| s.ready_replicas)),
        selector: spec.and_then(|s| selector_string(&s.selector)),
    }
}

fn statefulset_status(s: &StatefulSet) -> WorkloadStatus {
    let spec = s.spec.as_ref();
    WorkloadStatus {
        replicas: spec.and_then(|s| s.replicas).map_or(1, |r| r.max(0) as u32),
        ready_replicas: to_u32(s.status.as_ref().and_then(|s| s.ready_replicas)),
        selector: spec.and_then(|s| selector_string(&s.selector)),
    }
}

fn replicaset_status(r: &ReplicaSet) -> WorkloadStatus {
    let spec = r.spec.as_ref();
    WorkloadStatus {
        replicas: spec.and_then(|s| s.replicas).map_or(1, |r| r.max(0) as u32),
        ready_replicas: to_u32(r.status.as_ref().and_then(|s| s.ready_replicas)),
        selector: spec.and_then(|s| selector_string(&s.selector)),
    }
}

/// Fetch a workload's replica state with a bare client
pub async fn fetch_workload_status(
    client: &Client,
    target: &ScalingTarget,
) -> Result<Option<WorkloadStatus>> {
    let status = match target.kind {
        WorkloadKind::Deployment => Api::<Deployment>::namespaced(client.clone(), &target.namespace)
            .get_opt(&target.name)
            .await?
            .map(|d| deployment_status(&d)),
        WorkloadKind::StatefulSet => {
            Api::<StatefulSet>::namespaced(client.clone(), &target.namespace)
                .get_opt(&target.name)
                .await?
                .map(|s| statefulset_status(&s))
        }
        WorkloadKind::ReplicaSet => Api::<ReplicaSet>::namespaced(client.clone(), &target.namespace)
            .get_opt(&target.name)
            .await?
            .map(|r| replicaset_status(&r)),
    };
    Ok(status)
}

/// Control plane backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    default_namespace: String,
}

impl KubeControlPlane {
    /// Use the client's configured namespace as the default
    pub fn new(client: Client) -> Self {
        let default_namespace = client.default_namespace().to_string();
        Self {
            client,
            default_namespace,
        }
    }

    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    async fn list_refs<K>(&self, selector: &str, namespace: Option<&str>) -> Result<Vec<WorkloadRef>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let list = self
            .api::<K>(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;

        Ok(list
            .items
            .iter()
            .map(|obj| WorkloadRef {
                name: obj.name_any(),
                namespace: obj.namespace().unwrap_or_default(),
            })
            .collect())
    }

    async fn patch_replicas<K>(&self, target: &ScalingTarget, replicas: u32) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let patch = serde_json::json!({
            "spec": {
                "replicas": replicas,
            }
        });

        self.api::<K>(Some(&target.namespace))
            .patch(
                &target.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterControlPlane for KubeControlPlane {
    fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    async fn get_workload(&self, target: &ScalingTarget) -> Result<Option<WorkloadStatus>> {
        fetch_workload_status(&self.client, target).await
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        selector: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<WorkloadRef>> {
        debug!(kind = %kind, selector = %selector, namespace = ?namespace, "Listing workloads");
        match kind {
            WorkloadKind::Deployment => self.list_refs::<Deployment>(selector, namespace).await,
            WorkloadKind::StatefulSet => self.list_refs::<StatefulSet>(selector, namespace).await,
            WorkloadKind::ReplicaSet => self.list_refs::<ReplicaSet>(selector, namespace).await,
        }
    }

    async fn scale(&self, target: &ScalingTarget, replicas: u32) -> Result<()> {
        match target.kind {
            WorkloadKind::Deployment => self.patch_replicas::<Deployment>(target, replicas).await?,
            WorkloadKind::StatefulSet => {
                self.patch_replicas::<StatefulSet>(target, replicas).await?
            }
            WorkloadKind::ReplicaSet => self.patch_replicas::<ReplicaSet>(target, replicas).await?,
        }
        info!(target = %target, replicas = replicas, "Patched replica count");
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        let pods = self
            .api::<Pod>(Some(namespace))
            .list(&ListParams::default().labels(selector))
            .await?;

        Ok(pods
            .items
            .iter()
            .map(|pod| PodInfo {
                name: pod.name_any(),
                phase: pod
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
            })
            .collect())
    }
}
