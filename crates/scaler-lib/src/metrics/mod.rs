//! Live usage sources for metric triggers
//!
//! A [`MetricsSource`] produces a fresh [`MetricSample`] per evaluation;
//! nothing is cached between runs.

mod metrics_server;
mod prometheus;
mod quantity;

pub use self::metrics_server::{aggregate_pod_usage, MetricsServerSource, PodUsage};
pub use self::prometheus::{PrometheusSource, DEFAULT_CPU_QUERY, DEFAULT_MEM_QUERY};
pub use self::quantity::{parse_cpu_millicores, parse_memory_bytes};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Result, ScalerError};
use crate::models::{MetricSample, ScalingTarget};
use crate::trigger::MetricsBackend;

/// Trait for metric sample providers
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Backend this source serves
    fn backend(&self) -> MetricsBackend;

    /// Fetch current usage for a target, optionally with a backend query
    async fn sample(&self, target: &ScalingTarget, query: Option<&str>) -> Result<MetricSample>;
}

/// Source returning preset samples, for tests and dry experiments
pub struct StaticMetrics {
    backend: MetricsBackend,
    samples: RwLock<HashMap<ScalingTarget, MetricSample>>,
}

impl StaticMetrics {
    pub fn new(backend: MetricsBackend) -> Self {
        Self {
            backend,
            samples: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, target: &ScalingTarget, sample: MetricSample) {
        if let Ok(mut samples) = self.samples.write() {
            samples.insert(target.clone(), sample);
        }
    }
}

#[async_trait]
impl MetricsSource for StaticMetrics {
    fn backend(&self) -> MetricsBackend {
        self.backend
    }

    async fn sample(&self, target: &ScalingTarget, _query: Option<&str>) -> Result<MetricSample> {
        self.samples
            .read()
            .ok()
            .and_then(|samples| samples.get(target).copied())
            .ok_or_else(|| ScalerError::MetricsUnavailable(format!("no sample for {}", target)))
    }
}
