//! metrics-server backed usage source
//!
//! Reads `metrics.k8s.io/v1beta1` PodMetrics for the pods behind a workload
//! and averages them per pod. CPU is expressed as a percentage of the pod's
//! CPU requests, or of one core when the pod requests nothing.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::{Client, ResourceExt};
use std::collections::HashMap;
use tracing::debug;

use super::quantity::{parse_cpu_millicores, parse_memory_bytes};
use super::MetricsSource;
use crate::cluster::fetch_workload_status;
use crate::error::{Result, ScalerError};
use crate::models::{MetricSample, ScalingTarget};
use crate::trigger::MetricsBackend;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Usage and requests of a single pod
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodUsage {
    pub cpu_millicores: f64,
    pub mem_bytes: f64,
    pub cpu_request_millicores: Option<f64>,
    pub mem_request_bytes: Option<f64>,
}

/// Average pod usages into one sample; `None` when there are no pods
pub fn aggregate_pod_usage(pods: &[PodUsage]) -> Option<MetricSample> {
    if pods.is_empty() {
        return None;
    }

    let count = pods.len() as f64;
    let cpu_pct: f64 = pods
        .iter()
        .map(|p| match p.cpu_request_millicores {
            Some(request) if request > 0.0 => p.cpu_millicores / request * 100.0,
            _ => p.cpu_millicores / 10.0,
        })
        .sum::<f64>()
        / count;
    let mem_mb = pods.iter().map(|p| p.mem_bytes).sum::<f64>() / count / BYTES_PER_MB;

    let mut sample = MetricSample::new(cpu_pct, mem_mb);
    let requests: Option<Vec<f64>> = pods
        .iter()
        .map(|p| p.mem_request_bytes.filter(|r| *r > 0.0))
        .collect();
    if let Some(requests) = requests {
        sample = sample.with_mem_request(requests.iter().sum::<f64>() / count / BYTES_PER_MB);
    }

    Some(sample)
}

/// Sum container usage of one PodMetrics object
fn usage_from_pod_metrics(obj: &DynamicObject) -> (f64, f64) {
    let containers = obj
        .data
        .get("containers")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    containers.iter().fold((0.0, 0.0), |(cpu, mem), c| {
        let usage = &c["usage"];
        let cpu_m = usage["cpu"].as_str().and_then(parse_cpu_millicores).unwrap_or(0.0);
        let mem_b = usage["memory"]
            .as_str()
            .and_then(parse_memory_bytes)
            .unwrap_or(0.0);
        (cpu + cpu_m, mem + mem_b)
    })
}

/// Sum container requests of one pod
fn pod_requests(pod: &Pod) -> (Option<f64>, Option<f64>) {
    let mut cpu = None;
    let mut mem = None;

    let containers = pod.spec.iter().flat_map(|spec| spec.containers.iter());
    for requests in containers.filter_map(|c| c.resources.as_ref()?.requests.as_ref()) {
        if let Some(q) = requests.get("cpu").and_then(|q| parse_cpu_millicores(&q.0)) {
            *cpu.get_or_insert(0.0) += q;
        }
        if let Some(q) = requests.get("memory").and_then(|q| parse_memory_bytes(&q.0)) {
            *mem.get_or_insert(0.0) += q;
        }
    }

    (cpu, mem)
}

fn pod_metrics_resource() -> ApiResource {
    ApiResource {
        group: "metrics.k8s.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "metrics.k8s.io/v1beta1".to_string(),
        kind: "PodMetrics".to_string(),
        plural: "pods".to_string(),
    }
}

/// Metrics source backed by the cluster's metrics-server
#[derive(Clone)]
pub struct MetricsServerSource {
    client: Client,
}

impl MetricsServerSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsSource for MetricsServerSource {
    fn backend(&self) -> MetricsBackend {
        MetricsBackend::MetricsServer
    }

    async fn sample(&self, target: &ScalingTarget, _query: Option<&str>) -> Result<MetricSample> {
        let status = fetch_workload_status(&self.client, target)
            .await?
            .ok_or_else(|| ScalerError::NotFound {
                kind: target.kind,
                name: target.name.clone(),
                namespace: target.namespace.clone(),
            })?;
        let selector = status.selector.ok_or_else(|| {
            ScalerError::MetricsUnavailable(format!("{} has no pod selector", target))
        })?;
        let params = ListParams::default().labels(&selector);

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let requests: HashMap<String, (Option<f64>, Option<f64>)> = pods
            .list(&params)
            .await?
            .items
            .iter()
            .map(|pod| (pod.name_any(), pod_requests(pod)))
            .collect();

        let metrics: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &target.namespace, &pod_metrics_resource());
        let usages: Vec<PodUsage> = metrics
            .list(&params)
            .await?
            .items
            .iter()
            .map(|obj| {
                let (cpu_millicores, mem_bytes) = usage_from_pod_metrics(obj);
                let (cpu_request_millicores, mem_request_bytes) =
                    requests.get(&obj.name_any()).copied().unwrap_or((None, None));
                PodUsage {
                    cpu_millicores,
                    mem_bytes,
                    cpu_request_millicores,
                    mem_request_bytes,
                }
            })
            .collect();

        debug!(target = %target, pods = usages.len(), "Collected pod metrics");

        aggregate_pod_usage(&usages).ok_or_else(|| {
            ScalerError::MetricsUnavailable(format!("no pod metrics reported for {}", target))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_uses_cpu_requests() {
        let pods = vec![
            PodUsage {
                cpu_millicores: 400.0,
                mem_bytes: 100.0 * BYTES_PER_MB,
                cpu_request_millicores: Some(500.0),
                mem_request_bytes: Some(200.0 * BYTES_PER_MB),
            },
            PodUsage {
                cpu_millicores: 200.0,
                mem_bytes: 300.0 * BYTES_PER_MB,
                cpu_request_millicores: Some(500.0),
                mem_request_bytes: Some(200.0 * BYTES_PER_MB),
            },
        ];
        let sample = aggregate_pod_usage(&pods).unwrap();
        assert!((sample.cpu_usage_pct - 60.0).abs() < 1e-9);
        assert!((sample.mem_usage_mb - 200.0).abs() < 1e-9);
        assert_eq!(sample.mem_request_mb, Some(200.0));
        assert!((sample.mem_usage_pct() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_without_requests() {
        let pods = vec![PodUsage {
            cpu_millicores: 250.0,
            mem_bytes: 64.0 * BYTES_PER_MB,
            cpu_request_millicores: None,
            mem_request_bytes: None,
        }];
        let sample = aggregate_pod_usage(&pods).unwrap();
        assert!((sample.cpu_usage_pct - 25.0).abs() < 1e-9);
        assert_eq!(sample.mem_request_mb, None);
        assert!((sample.mem_usage_pct() - 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate_pod_usage(&[]).is_none());
    }

    #[test]
    fn test_usage_from_pod_metrics() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "metrics.k8s.io/v1beta1",
            "kind": "PodMetrics",
            "metadata": {"name": "web-abc", "namespace": "default"},
            "timestamp": "2024-01-03T08:00:00Z",
            "window": "15s",
            "containers": [
                {"name": "app", "usage": {"cpu": "150m", "memory": "64Mi"}},
                {"name": "sidecar", "usage": {"cpu": "50000000n", "memory": "16Mi"}}
            ]
        }))
        .unwrap();
        let (cpu, mem) = usage_from_pod_metrics(&obj);
        assert!((cpu - 200.0).abs() < 1e-9);
        assert!((mem - 80.0 * BYTES_PER_MB).abs() < 1e-6);
    }

    #[test]
    fn test_pod_requests_summed() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-abc"},
            "spec": {"containers": [
                {"name": "app", "resources": {"requests": {"cpu": "250m", "memory": "128Mi"}}},
                {"name": "sidecar", "resources": {"requests": {"cpu": "50m"}}}
            ]}
        }))
        .unwrap();
        let (cpu, mem) = pod_requests(&pod);
        assert_eq!(cpu, Some(300.0));
        assert_eq!(mem, Some(128.0 * BYTES_PER_MB));
    }
}
