//! Observability infrastructure for the scaling engine
//!
//! Provides:
//! - Prometheus metrics (runs, decisions, failures, run duration)
//! - Structured logging of decisions and verifications with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::{DecisionOutcome, RunSummary, ScalingDecision};
use crate::verifier::{VerificationReport, VerifyOutcome};

/// Histogram buckets for run duration (in seconds)
const RUN_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    runs_total: IntCounter,
    run_errors_total: IntCounter,
    run_duration_seconds: Histogram,
    targets_processed_total: IntCounter,
    decisions_total: IntCounterVec,
    verification_failures_total: IntCounter,
    last_run_timestamp: IntGauge,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            runs_total: register_int_counter!(
                "workload_scaler_runs_total",
                "Number of scaling runs started"
            )
            .expect("Failed to register runs_total"),

            run_errors_total: register_int_counter!(
                "workload_scaler_run_errors_total",
                "Runs aborted before processing targets"
            )
            .expect("Failed to register run_errors_total"),

            run_duration_seconds: register_histogram!(
                "workload_scaler_run_duration_seconds",
                "Wall time of one scaling run including verification",
                RUN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register run_duration_seconds"),

            targets_processed_total: register_int_counter!(
                "workload_scaler_targets_processed_total",
                "Targets evaluated across all runs"
            )
            .expect("Failed to register targets_processed_total"),

            decisions_total: register_int_counter_vec!(
                "workload_scaler_decisions_total",
                "Scaling decisions by outcome",
                &["outcome"]
            )
            .expect("Failed to register decisions_total"),

            verification_failures_total: register_int_counter!(
                "workload_scaler_verification_failures_total",
                "Scaled targets that did not become ready in time"
            )
            .expect("Failed to register verification_failures_total"),

            last_run_timestamp: register_int_gauge!(
                "workload_scaler_last_run_timestamp_seconds",
                "Unix time the last run finished"
            )
            .expect("Failed to register last_run_timestamp"),
        }
    }
}

/// Scaler metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn inc_runs(&self) {
        self.inner().runs_total.inc();
    }

    pub fn inc_run_errors(&self) {
        self.inner().run_errors_total.inc();
    }

    pub fn record_decision(&self, outcome: DecisionOutcome) {
        self.inner()
            .decisions_total
            .with_label_values(&[&outcome.to_string()])
            .inc();
    }

    /// Count targets dropped before reaching the executor
    pub fn record_skipped_by_cap(&self, count: u32) {
        if count > 0 {
            self.inner()
                .decisions_total
                .with_label_values(&[&DecisionOutcome::SkippedByCap.to_string()])
                .inc_by(u64::from(count));
        }
    }

    /// Current value of `decisions_total` for one outcome
    pub fn decision_count(&self, outcome: DecisionOutcome) -> u64 {
        self.inner()
            .decisions_total
            .with_label_values(&[&outcome.to_string()])
            .get()
    }

    pub fn inc_verification_failures(&self) {
        self.inner().verification_failures_total.inc();
    }

    /// Record a finished run
    pub fn record_run(&self, summary: &RunSummary, duration_secs: f64) {
        let inner = self.inner();
        inner.run_duration_seconds.observe(duration_secs);
        inner
            .targets_processed_total
            .inc_by(u64::from(summary.targets_processed));
        inner
            .last_run_timestamp
            .set(chrono::Utc::now().timestamp());
    }
}

/// Structured logger for scaling events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_decision(&self, decision: &ScalingDecision) {
        let target = &decision.target;
        match decision.outcome {
            DecisionOutcome::Failed | DecisionOutcome::SkippedByCap => {
                warn!(
                    event = "scale_decision",
                    instance = %self.instance,
                    kind = %target.kind,
                    name = %target.name,
                    namespace = %target.namespace,
                    current_replicas = decision.current_replicas,
                    desired_replicas = decision.desired_replicas,
                    outcome = %decision.outcome,
                    note = decision.note.as_deref().unwrap_or(""),
                    "Scaling decision not applied"
                );
            }
            _ => {
                info!(
                    event = "scale_decision",
                    instance = %self.instance,
                    kind = %target.kind,
                    name = %target.name,
                    namespace = %target.namespace,
                    current_replicas = decision.current_replicas,
                    desired_replicas = decision.desired_replicas,
                    applied = decision.applied,
                    outcome = %decision.outcome,
                    note = decision.note.as_deref().unwrap_or(""),
                    "Scaling decision"
                );
            }
        }
    }

    pub fn log_verification(&self, report: &VerificationReport) {
        match &report.outcome {
            VerifyOutcome::Healthy { elapsed_secs } => {
                info!(
                    event = "verification",
                    instance = %self.instance,
                    target = %report.target,
                    desired_replicas = report.desired_replicas,
                    outcome = "healthy",
                    elapsed_secs = *elapsed_secs,
                    "Workload ready"
                );
            }
            VerifyOutcome::Timeout {
                last_ready,
                pending_pods,
            } => {
                warn!(
                    event = "verification",
                    instance = %self.instance,
                    target = %report.target,
                    desired_replicas = report.desired_replicas,
                    outcome = "timeout",
                    ready_replicas = *last_ready,
                    pending_pods = %pending_pods.join(","),
                    "Workload did not become ready before timeout"
                );
            }
            VerifyOutcome::NotFound => {
                warn!(
                    event = "verification",
                    instance = %self.instance,
                    target = %report.target,
                    desired_replicas = report.desired_replicas,
                    outcome = "not_found",
                    "Workload disappeared during verification"
                );
            }
        }
    }

    pub fn log_run_summary(&self, summary: &RunSummary, duration_secs: f64) {
        info!(
            event = "run_summary",
            instance = %self.instance,
            targets_processed = summary.targets_processed,
            scales_applied = summary.scales_applied,
            scales_failed = summary.scales_failed,
            verification_failures = summary.verification_failures,
            dry_run_planned = summary.dry_run_planned,
            unchanged = summary.unchanged,
            not_found = summary.not_found,
            metrics_unavailable = summary.metrics_unavailable,
            skipped_by_cap = summary.skipped_by_cap,
            malformed_lines = summary.malformed_lines,
            duration_secs = duration_secs,
            "Scaling run finished"
        );
    }

    pub fn log_startup(&self, version: &str, request: &str, trigger: &str) {
        info!(
            event = "scaler_started",
            instance = %self.instance,
            version = %version,
            request = %request,
            trigger = %trigger,
            "Workload scaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scaler_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Workload scaler shutting down"
        );
    }
}
