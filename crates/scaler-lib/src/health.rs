//! Daemon health derived from scaling runs
//!
//! The scaler has three fixed components. Their state only changes when a
//! run finishes or aborts, so `/healthz` always describes the last run.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::RunSummary;

/// Parts of the daemon reported on `/healthz`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Resolution, evaluation and execution of a run
    Engine,
    /// Kubernetes API reachability
    Cluster,
    /// metrics-server or Prometheus
    MetricsSource,
}

/// Ordered from best to worst so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last run had failures but the loop keeps going
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
    /// Counters of the last completed run, absent before the first one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct State {
    ready: bool,
    components: BTreeMap<Component, ComponentHealth>,
    last_run: Option<RunSummary>,
}

impl State {
    fn set(&mut self, component: Component, status: ComponentStatus, message: Option<String>) {
        self.components
            .insert(component, ComponentHealth::new(status, message));
    }
}

/// Shared health state of the daemon; clones observe the same state
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// All components start healthy; readiness waits for `set_ready`
    pub fn new() -> Self {
        let components = [Component::Engine, Component::Cluster, Component::MetricsSource]
            .into_iter()
            .map(|c| (c, ComponentHealth::new(ComponentStatus::Healthy, None)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(State {
                ready: false,
                components,
                last_run: None,
            })),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    /// Fold a completed run into the component states
    pub async fn record_run(&self, summary: &RunSummary) {
        let mut state = self.state.write().await;
        state.set(Component::Cluster, ComponentStatus::Healthy, None);

        if summary.has_failures() {
            let message = format!(
                "last run: {} scale failures, {} verification failures, {} not found",
                summary.scales_failed, summary.verification_failures, summary.not_found
            );
            state.set(Component::Engine, ComponentStatus::Degraded, Some(message));
        } else {
            state.set(Component::Engine, ComponentStatus::Healthy, None);
        }

        if summary.metrics_unavailable > 0 {
            let message = format!("no metrics for {} targets", summary.metrics_unavailable);
            state.set(Component::MetricsSource, ComponentStatus::Degraded, Some(message));
        } else {
            state.set(Component::MetricsSource, ComponentStatus::Healthy, None);
        }

        state.last_run = Some(summary.clone());
    }

    /// The run could not reach the Kubernetes API
    pub async fn record_cluster_error(&self, message: impl Into<String>) {
        let mut state = self.state.write().await;
        state.set(Component::Cluster, ComponentStatus::Unhealthy, Some(message.into()));
    }

    /// The run aborted before processing targets for any other reason
    pub async fn record_run_error(&self, message: impl Into<String>) {
        let mut state = self.state.write().await;
        state.set(Component::Engine, ComponentStatus::Degraded, Some(message.into()));
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
            last_run: state.last_run.clone(),
        }
    }

    /// Ready once started, unless the cluster is unreachable
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if !state.ready {
            Some("Scaler not yet initialized".to_string())
        } else {
            state
                .components
                .get(&Component::Cluster)
                .filter(|c| c.status == ComponentStatus::Unhealthy)
                .map(|c| {
                    format!(
                        "Kubernetes API unreachable: {}",
                        c.message.as_deref().unwrap_or("unknown error")
                    )
                })
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}
