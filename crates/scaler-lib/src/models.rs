//! Core data models for the scaling engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScalerError;

/// Kind of scalable workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    ReplicaSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "deployment",
            WorkloadKind::StatefulSet => "statefulset",
            WorkloadKind::ReplicaSet => "replicaset",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = ScalerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => Ok(WorkloadKind::Deployment),
            "statefulset" | "statefulsets" | "sts" => Ok(WorkloadKind::StatefulSet),
            "replicaset" | "replicasets" | "rs" => Ok(WorkloadKind::ReplicaSet),
            other => Err(ScalerError::Validation(format!(
                "unsupported workload type '{}' (expected deployment, statefulset or replicaset)",
                other
            ))),
        }
    }
}

/// One resolved workload to evaluate and scale
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScalingTarget {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

impl ScalingTarget {
    pub fn new(kind: WorkloadKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ScalingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Replica state of a workload as reported by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
    /// Label selector of the workload's pods, in `k=v,k2=v2` form
    pub selector: Option<String>,
}

/// Name and namespace of a listed workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub name: String,
    pub namespace: String,
}

/// Pod name and lifecycle phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub phase: String,
}

impl PodInfo {
    pub fn is_running(&self) -> bool {
        self.phase.eq_ignore_ascii_case("running")
    }
}

/// Live resource usage of a workload, averaged per pod
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub cpu_usage_pct: f64,
    pub mem_usage_mb: f64,
    /// Average memory request per pod, when the source knows it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_request_mb: Option<f64>,
}

impl MetricSample {
    pub fn new(cpu_usage_pct: f64, mem_usage_mb: f64) -> Self {
        Self {
            cpu_usage_pct,
            mem_usage_mb,
            mem_request_mb: None,
        }
    }

    pub fn with_mem_request(mut self, mem_request_mb: f64) -> Self {
        self.mem_request_mb = Some(mem_request_mb);
        self
    }

    /// Memory usage comparable with a percentage threshold.
    ///
    /// Relative to the memory request when known, otherwise the raw MB value.
    pub fn mem_usage_pct(&self) -> f64 {
        match self.mem_request_mb {
            Some(request) if request > 0.0 => self.mem_usage_mb / request * 100.0,
            _ => self.mem_usage_mb,
        }
    }
}

/// What happened to a target during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Scale call succeeded
    Applied,
    /// Would have been applied, dry-run mode
    DryRun,
    /// Desired count already in place
    Unchanged,
    /// Trigger produced no desired count
    NoAction,
    /// Operations budget exhausted before this target
    SkippedByCap,
    /// Target missing or scale call failed
    Failed,
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionOutcome::Applied => "applied",
            DecisionOutcome::DryRun => "dry_run",
            DecisionOutcome::Unchanged => "unchanged",
            DecisionOutcome::NoAction => "no_action",
            DecisionOutcome::SkippedByCap => "skipped_by_cap",
            DecisionOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-target result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub target: ScalingTarget,
    pub current_replicas: u32,
    pub desired_replicas: u32,
    pub applied: bool,
    pub outcome: DecisionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ScalingDecision {
    pub fn new(
        target: ScalingTarget,
        current_replicas: u32,
        desired_replicas: u32,
        outcome: DecisionOutcome,
    ) -> Self {
        Self {
            target,
            current_replicas,
            desired_replicas,
            applied: outcome == DecisionOutcome::Applied,
            outcome,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Aggregate counters for one engine invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub targets_processed: u32,
    pub scales_applied: u32,
    pub scales_failed: u32,
    pub verification_failures: u32,
    pub dry_run_planned: u32,
    pub unchanged: u32,
    pub not_found: u32,
    pub metrics_unavailable: u32,
    /// Targets not attempted because the operations cap was reached
    pub skipped_by_cap: u32,
    /// Batch lines skipped as malformed
    pub malformed_lines: u32,
}

impl RunSummary {
    /// True when any target failed to scale, vanished, or failed verification
    pub fn has_failures(&self) -> bool {
        self.scales_failed > 0 || self.verification_failures > 0 || self.not_found > 0
    }
}
