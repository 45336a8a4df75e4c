//! Post-scale health verification
//!
//! Polls a target until its ready replicas reach the requested count, the
//! workload disappears, or the timeout elapses.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cluster::ClusterControlPlane;
use crate::error::ScalerError;
use crate::models::ScalingTarget;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Terminal state of one verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Healthy {
        elapsed_secs: u64,
    },
    Timeout {
        last_ready: u32,
        /// Pods of the workload not in the Running phase at timeout
        pending_pods: Vec<String>,
    },
    NotFound,
}

impl VerifyOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, VerifyOutcome::Healthy { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            VerifyOutcome::Healthy { .. } => "healthy",
            VerifyOutcome::Timeout { .. } => "timeout",
            VerifyOutcome::NotFound => "not_found",
        }
    }
}

/// Verification result for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub target: ScalingTarget,
    pub desired_replicas: u32,
    pub outcome: VerifyOutcome,
}

impl VerificationReport {
    /// Failure as an error value, `None` when healthy
    pub fn error(&self, timeout: Duration) -> Option<ScalerError> {
        match &self.outcome {
            VerifyOutcome::Healthy { .. } => None,
            VerifyOutcome::Timeout { last_ready, .. } => Some(ScalerError::VerificationTimeout {
                target: self.target.to_string(),
                timeout,
                ready: *last_ready,
                desired: self.desired_replicas,
            }),
            VerifyOutcome::NotFound => Some(ScalerError::NotFound {
                kind: self.target.kind,
                name: self.target.name.clone(),
                namespace: self.target.namespace.clone(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct HealthVerifier {
    cluster: Arc<dyn ClusterControlPlane>,
    poll_interval: Duration,
}

impl HealthVerifier {
    pub fn new(cluster: Arc<dyn ClusterControlPlane>) -> Self {
        Self {
            cluster,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Poll until converged. The grace period is slept once before the
    /// first poll and is not counted against `timeout`.
    pub async fn verify(
        &self,
        target: &ScalingTarget,
        desired: u32,
        timeout: Duration,
        grace: Option<Duration>,
    ) -> VerificationReport {
        if let Some(grace) = grace.filter(|g| !g.is_zero()) {
            debug!(target = %target, grace_secs = grace.as_secs(), "Waiting before first readiness poll");
            tokio::time::sleep(grace).await;
        }

        let started = Instant::now();
        let deadline = started + timeout;
        let mut last_ready = 0;
        let mut selector = None;

        let outcome = loop {
            match self.cluster.get_workload(target).await {
                Ok(None) => break VerifyOutcome::NotFound,
                Ok(Some(status)) => {
                    last_ready = status.ready_replicas;
                    selector = status.selector.or(selector);
                    debug!(
                        target = %target,
                        ready = last_ready,
                        desired = desired,
                        "Readiness poll"
                    );
                    if last_ready == desired {
                        break VerifyOutcome::Healthy {
                            elapsed_secs: started.elapsed().as_secs(),
                        };
                    }
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "Readiness poll failed, will retry");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break VerifyOutcome::Timeout {
                    last_ready,
                    pending_pods: self.pending_pods(target, selector.as_deref()).await,
                };
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        };

        VerificationReport {
            target: target.clone(),
            desired_replicas: desired,
            outcome,
        }
    }

    async fn pending_pods(&self, target: &ScalingTarget, selector: Option<&str>) -> Vec<String> {
        let Some(selector) = selector else {
            return Vec::new();
        };
        match self.cluster.list_pods(&target.namespace, selector).await {
            Ok(pods) => pods
                .into_iter()
                .filter(|p| !p.is_running())
                .map(|p| p.name)
                .collect(),
            Err(e) => {
                warn!(target = %target, error = %e, "Could not list pods for diagnostics");
                Vec::new()
            }
        }
    }
}
