//! Cluster control plane access
//!
//! The engine only talks to the cluster through [`ClusterControlPlane`]:
//! [`KubeControlPlane`] wraps the Kubernetes API, [`InMemoryCluster`] keeps
//! workloads in memory for tests.

mod k8s;
mod memory;

pub use self::k8s::{connect, fetch_workload_status, selector_string, KubeControlPlane};
pub use self::memory::InMemoryCluster;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{PodInfo, ScalingTarget, WorkloadKind, WorkloadRef, WorkloadStatus};

/// Trait for the orchestrator's scale/describe API
#[async_trait]
pub trait ClusterControlPlane: Send + Sync {
    /// Namespace used when a request names none
    fn default_namespace(&self) -> &str;

    /// Replica state of a workload, `None` if it does not exist
    async fn get_workload(&self, target: &ScalingTarget) -> Result<Option<WorkloadStatus>>;

    /// Workloads of `kind` matching a label selector; all namespaces when `namespace` is `None`
    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        selector: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<WorkloadRef>>;

    /// Set the desired replica count of a workload
    async fn scale(&self, target: &ScalingTarget, replicas: u32) -> Result<()>;

    /// Pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>>;
}
