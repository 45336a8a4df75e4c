//! Trigger evaluation
//!
//! Decides, for one target, whether and to what replica count it should be
//! scaled under a fixed, metric or schedule trigger.

mod metric;
mod schedule;

pub use metric::evaluate_metric;
pub use schedule::{
    first_match, load_schedule_file, parse_schedule, DayClass, ScheduleEntry, TimeMatcher,
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, ScalerError};
use crate::metrics::MetricsSource;
use crate::models::ScalingTarget;

/// Where metric samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetricsBackend {
    #[default]
    MetricsServer,
    Prometheus,
}

impl fmt::Display for MetricsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsBackend::MetricsServer => f.write_str("metrics-server"),
            MetricsBackend::Prometheus => f.write_str("prometheus"),
        }
    }
}

impl FromStr for MetricsBackend {
    type Err = ScalerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "metrics-server" | "metrics" => Ok(MetricsBackend::MetricsServer),
            "prometheus" | "prom" => Ok(MetricsBackend::Prometheus),
            other => Err(ScalerError::validation(format!(
                "unknown metrics source '{}'",
                other
            ))),
        }
    }
}

/// Parameters of a metric-threshold trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrigger {
    #[serde(default = "default_min")]
    pub min: u32,
    #[serde(default = "default_max")]
    pub max: u32,
    #[serde(default = "default_threshold")]
    pub cpu_threshold_pct: u32,
    #[serde(default = "default_threshold")]
    pub mem_threshold_pct: u32,
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f64,
    #[serde(default = "default_step_size")]
    pub step_size: u32,
    #[serde(default)]
    pub source: MetricsBackend,
    /// Backend query overriding the default CPU query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

fn default_min() -> u32 {
    1
}

fn default_max() -> u32 {
    10
}

fn default_threshold() -> u32 {
    80
}

fn default_scaling_factor() -> f64 {
    1.5
}

fn default_step_size() -> u32 {
    1
}

impl Default for MetricTrigger {
    fn default() -> Self {
        Self {
            min: default_min(),
            max: default_max(),
            cpu_threshold_pct: default_threshold(),
            mem_threshold_pct: default_threshold(),
            scaling_factor: default_scaling_factor(),
            step_size: default_step_size(),
            source: MetricsBackend::default(),
            query: None,
        }
    }
}

impl MetricTrigger {
    pub fn clamp(&self, replicas: u32) -> u32 {
        replicas.clamp(self.min, self.max)
    }

    fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(ScalerError::validation(format!(
                "min replicas ({}) exceeds max replicas ({})",
                self.min, self.max
            )));
        }
        if self.step_size == 0 {
            return Err(ScalerError::validation("step size must be at least 1"));
        }
        for (name, value) in [
            ("cpu", self.cpu_threshold_pct),
            ("memory", self.mem_threshold_pct),
        ] {
            if value == 0 || value > 100 {
                return Err(ScalerError::validation(format!(
                    "{} threshold must be within 1-100, got {}",
                    name, value
                )));
            }
        }
        if !self.scaling_factor.is_finite() || self.scaling_factor <= 0.0 {
            return Err(ScalerError::validation(format!(
                "scaling factor must be positive, got {}",
                self.scaling_factor
            )));
        }
        Ok(())
    }
}

/// How a desired replica count is computed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerSpec {
    Fixed { replicas: u32 },
    Metric(MetricTrigger),
    Schedule { entries: Vec<ScheduleEntry> },
}

impl TriggerSpec {
    pub fn validate(&self) -> Result<()> {
        match self {
            TriggerSpec::Fixed { .. } => Ok(()),
            TriggerSpec::Metric(metric) => metric.validate(),
            TriggerSpec::Schedule { entries } if entries.is_empty() => {
                Err(ScalerError::validation("schedule has no entries"))
            }
            TriggerSpec::Schedule { .. } => Ok(()),
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            TriggerSpec::Fixed { .. } => "fixed",
            TriggerSpec::Metric(_) => "metric",
            TriggerSpec::Schedule { .. } => "schedule",
        }
    }

    /// Metric scales get a grace period before verification
    pub fn is_metric(&self) -> bool {
        matches!(self, TriggerSpec::Metric(_))
    }
}

/// Result of evaluating a trigger for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Scale to this many replicas
    Scale(u32),
    /// Leave the target alone
    NoOp(String),
}

/// Evaluates triggers, fetching live metrics when needed
#[derive(Clone, Default)]
pub struct TriggerEvaluator {
    sources: Vec<Arc<dyn MetricsSource>>,
}

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metrics source; the last one registered for a backend wins
    pub fn with_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.sources.retain(|s| s.backend() != source.backend());
        self.sources.push(source);
        self
    }

    fn source(&self, backend: MetricsBackend) -> Option<&Arc<dyn MetricsSource>> {
        self.sources.iter().find(|s| s.backend() == backend)
    }

    /// Compute the desired replica count for `target`.
    ///
    /// Fails only with `MetricsUnavailable`; callers treat that as a no-op.
    pub async fn evaluate(
        &self,
        target: &ScalingTarget,
        trigger: &TriggerSpec,
        current: u32,
        now: &DateTime<Local>,
    ) -> Result<Evaluation> {
        match trigger {
            TriggerSpec::Fixed { replicas } => Ok(Evaluation::Scale(*replicas)),
            TriggerSpec::Metric(metric) => {
                let source = self.source(metric.source).ok_or_else(|| {
                    ScalerError::MetricsUnavailable(format!(
                        "no {} source configured",
                        metric.source
                    ))
                })?;

                let sample = match source.sample(target, metric.query.as_deref()).await {
                    Ok(sample) => sample,
                    Err(ScalerError::MetricsUnavailable(msg)) => {
                        return Err(ScalerError::MetricsUnavailable(msg))
                    }
                    Err(e) => {
                        warn!(target = %target, error = %e, "Metrics query failed");
                        return Err(ScalerError::MetricsUnavailable(e.to_string()));
                    }
                };

                debug!(
                    target = %target,
                    cpu_usage_pct = sample.cpu_usage_pct,
                    mem_usage_mb = sample.mem_usage_mb,
                    current_replicas = current,
                    "Fetched metric sample"
                );

                Ok(evaluate_metric(metric, &sample, current))
            }
            TriggerSpec::Schedule { entries } => Ok(match first_match(entries, now) {
                Some(entry) => Evaluation::Scale(entry.replicas),
                None => Evaluation::NoOp(format!("no schedule entry matches {}", now.format("%a %H:%M"))),
            }),
        }
    }
}
