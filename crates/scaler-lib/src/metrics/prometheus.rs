//! Prometheus backed usage source
//!
//! Runs instant queries against `/api/v1/query`. Query templates may use
//! `{namespace}`, `{name}` and `{kind}` placeholders.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::MetricsSource;
use crate::error::{Result, ScalerError};
use crate::models::{MetricSample, ScalingTarget};
use crate::trigger::MetricsBackend;

/// CPU usage as a percentage of requested CPU, averaged over the workload's pods
pub const DEFAULT_CPU_QUERY: &str = r#"sum(rate(container_cpu_usage_seconds_total{namespace="{namespace}",pod=~"{name}-.*",container!=""}[5m])) / sum(kube_pod_container_resource_requests{namespace="{namespace}",pod=~"{name}-.*",resource="cpu"}) * 100"#;

/// Average working-set memory per pod in MB
pub const DEFAULT_MEM_QUERY: &str = r#"sum(container_memory_working_set_bytes{namespace="{namespace}",pod=~"{name}-.*",container!=""}) / count(count by (pod) (container_memory_working_set_bytes{namespace="{namespace}",pod=~"{name}-.*",container!=""})) / 1048576"#;

/// Average memory request per pod in MB
const DEFAULT_MEM_REQUEST_QUERY: &str = r#"sum(kube_pod_container_resource_requests{namespace="{namespace}",pod=~"{name}-.*",resource="memory"}) / count(count by (pod) (kube_pod_container_resource_requests{namespace="{namespace}",pod=~"{name}-.*",resource="memory"})) / 1048576"#;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    value: (f64, String),
}

/// Metrics source querying a Prometheus-compatible HTTP API
pub struct PrometheusSource {
    client: Client,
    base_url: Url,
    cpu_query: String,
    mem_query: String,
    mem_request_query: Option<String>,
}

impl PrometheusSource {
    /// Create a source for the given Prometheus base URL
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url).map_err(|e| {
            ScalerError::validation(format!("invalid Prometheus URL '{}': {}", base_url, e))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url,
            cpu_query: DEFAULT_CPU_QUERY.to_string(),
            mem_query: DEFAULT_MEM_QUERY.to_string(),
            mem_request_query: Some(DEFAULT_MEM_REQUEST_QUERY.to_string()),
        })
    }

    pub fn with_cpu_query(mut self, template: impl Into<String>) -> Self {
        self.cpu_query = template.into();
        self
    }

    pub fn with_mem_query(mut self, template: impl Into<String>) -> Self {
        self.mem_query = template.into();
        self
    }

    /// Skip the memory request lookup; memory is then compared in raw MB
    pub fn without_mem_request(mut self) -> Self {
        self.mem_request_query = None;
        self
    }

    /// Run an instant query and return the first sample value, if any
    pub async fn query(&self, promql: &str) -> Result<Option<f64>> {
        let url = self
            .base_url
            .join("api/v1/query")
            .map_err(|e| ScalerError::validation(format!("invalid query URL: {}", e)))?;

        let response = self.client.get(url).query(&[("query", promql)]).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ScalerError::MetricsUnavailable(format!(
                "Prometheus returned {}: {}",
                status, body
            )));
        }

        let body: QueryResponse = response.json().await?;
        if body.status != "success" {
            return Err(ScalerError::MetricsUnavailable(
                body.error.unwrap_or_else(|| format!("query status '{}'", body.status)),
            ));
        }

        Ok(body
            .data
            .and_then(|d| d.result.into_iter().next())
            .and_then(|s| s.value.1.parse::<f64>().ok())
            .filter(|v| v.is_finite()))
    }
}

/// Substitute target placeholders into a query template
pub(crate) fn render_query(template: &str, target: &ScalingTarget) -> String {
    template
        .replace("{namespace}", &target.namespace)
        .replace("{name}", &target.name)
        .replace("{kind}", target.kind.as_str())
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    fn backend(&self) -> MetricsBackend {
        MetricsBackend::Prometheus
    }

    async fn sample(&self, target: &ScalingTarget, query: Option<&str>) -> Result<MetricSample> {
        let cpu_query = render_query(query.unwrap_or(self.cpu_query.as_str()), target);
        let cpu = self.query(&cpu_query).await?.ok_or_else(|| {
            ScalerError::MetricsUnavailable(format!("CPU query returned no data for {}", target))
        })?;

        let mem = self
            .query(&render_query(&self.mem_query, target))
            .await?
            .ok_or_else(|| {
                ScalerError::MetricsUnavailable(format!(
                    "memory query returned no data for {}",
                    target
                ))
            })?;

        let mut sample = MetricSample::new(cpu, mem);
        if let Some(template) = &self.mem_request_query {
            match self.query(&render_query(template, target)).await {
                Ok(Some(request)) if request > 0.0 => sample = sample.with_mem_request(request),
                Ok(_) => {}
                Err(e) => debug!(target = %target, error = %e, "Memory request query failed"),
            }
        }

        Ok(sample)
    }
}
