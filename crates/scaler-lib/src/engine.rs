//! Scaling engine
//!
//! Resolves a request into targets, then for each target in order:
//! evaluate the trigger, apply the desired count, verify readiness.
//! Validation problems abort before any mutation; everything that goes
//! wrong for a single target is counted and the run moves on.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cluster::ClusterControlPlane;
use crate::context::RunContext;
use crate::error::{Result, ScalerError};
use crate::executor::{ExecutorConfig, ScalingExecutor};
use crate::models::{DecisionOutcome, RunSummary, ScalingDecision};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::resolver::{PlannedTarget, ScalingRequest, TargetResolver};
use crate::trigger::{Evaluation, TriggerEvaluator, TriggerSpec};
use crate::verifier::{HealthVerifier, VerificationReport};

/// Per-run switches
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Compute and report decisions without scaling
    pub dry_run: bool,
    /// Required to mutate the cluster unless `dry_run` is set
    pub force: bool,
    /// Cap on scale calls across the whole run
    pub max_operations: Option<u32>,
    pub verify: bool,
    pub verify_timeout: Duration,
    /// Wait before the first readiness poll after metric-triggered scales
    pub grace_period: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            max_operations: None,
            verify: true,
            verify_timeout: Duration::from_secs(300),
            grace_period: Duration::from_secs(30),
        }
    }
}

impl RunOptions {
    fn validate(&self) -> Result<()> {
        if !self.dry_run && !self.force {
            return Err(ScalerError::validation(
                "refusing to scale without confirmation: set force or dry_run",
            ));
        }
        if self.max_operations == Some(0) {
            return Err(ScalerError::validation("max operations must be at least 1"));
        }
        Ok(())
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub decisions: Vec<ScalingDecision>,
    pub verifications: Vec<VerificationReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.summary.has_failures()
    }
}

pub struct ScalingEngine {
    cluster: Arc<dyn ClusterControlPlane>,
    resolver: TargetResolver,
    evaluator: TriggerEvaluator,
    executor: ScalingExecutor,
    verifier: HealthVerifier,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl ScalingEngine {
    pub fn new(
        cluster: Arc<dyn ClusterControlPlane>,
        evaluator: TriggerEvaluator,
        executor_config: ExecutorConfig,
    ) -> Self {
        Self {
            resolver: TargetResolver::new(cluster.clone()),
            executor: ScalingExecutor::new(cluster.clone(), executor_config),
            verifier: HealthVerifier::new(cluster.clone()),
            cluster,
            evaluator,
            metrics: ScalerMetrics::new(),
            logger: StructuredLogger::new("workload-scaler"),
        }
    }

    pub fn with_verifier(mut self, verifier: HealthVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub async fn run(
        &self,
        request: &ScalingRequest,
        trigger: Option<&TriggerSpec>,
        options: &RunOptions,
    ) -> Result<RunReport> {
        self.run_at(request, trigger, options, &Local::now()).await
    }

    /// Run with an explicit "now" for schedule matching.
    ///
    /// Batch lines pin their own replica count; other requests need a trigger.
    pub async fn run_at(
        &self,
        request: &ScalingRequest,
        trigger: Option<&TriggerSpec>,
        options: &RunOptions,
        now: &DateTime<Local>,
    ) -> Result<RunReport> {
        self.metrics.inc_runs();
        let started = Instant::now();

        let result = self.execute(request, trigger, options, now).await;
        if let Err(e) = &result {
            self.metrics.inc_run_errors();
            warn!(request = %request.describe(), error = %e, "Scaling run aborted");
        }
        let report = result?;

        let duration = started.elapsed().as_secs_f64();
        self.metrics.record_run(&report.summary, duration);
        self.logger.log_run_summary(&report.summary, duration);
        Ok(report)
    }

    async fn execute(
        &self,
        request: &ScalingRequest,
        trigger: Option<&TriggerSpec>,
        options: &RunOptions,
        now: &DateTime<Local>,
    ) -> Result<RunReport> {
        options.validate()?;
        match trigger {
            Some(trigger) => trigger.validate()?,
            None if !matches!(request, ScalingRequest::Batch { .. }) => {
                return Err(ScalerError::validation(format!(
                    "a trigger is required to scale {}",
                    request.describe()
                )))
            }
            None => {}
        }

        let resolution = self.resolver.resolve(request, options.max_operations).await?;

        let mut ctx = RunContext::new(options.max_operations);
        ctx.summary.malformed_lines = resolution.malformed_lines;
        ctx.summary.skipped_by_cap = resolution.truncated;
        self.metrics.record_skipped_by_cap(resolution.truncated);

        let mut report = RunReport::default();
        for planned in &resolution.targets {
            ctx.summary.targets_processed += 1;
            let (decision, verification) =
                self.process_target(&mut ctx, planned, trigger, options, now).await;

            self.metrics.record_decision(decision.outcome);
            self.logger.log_decision(&decision);
            report.decisions.push(decision);

            if let Some(verification) = verification {
                if !verification.outcome.is_healthy() {
                    ctx.summary.verification_failures += 1;
                    self.metrics.inc_verification_failures();
                }
                self.logger.log_verification(&verification);
                report.verifications.push(verification);
            }
        }

        report.summary = ctx.into_summary();
        Ok(report)
    }

    async fn process_target(
        &self,
        ctx: &mut RunContext,
        planned: &PlannedTarget,
        trigger: Option<&TriggerSpec>,
        options: &RunOptions,
        now: &DateTime<Local>,
    ) -> (ScalingDecision, Option<VerificationReport>) {
        let target = &planned.target;
        let failed = |current: u32, note: String| {
            ScalingDecision::new(target.clone(), current, current, DecisionOutcome::Failed)
                .with_note(note)
        };

        let current = match self.cluster.get_workload(target).await {
            Ok(Some(status)) => status.replicas,
            Ok(None) => {
                ctx.summary.not_found += 1;
                return (failed(0, "workload not found".to_string()), None);
            }
            Err(e) => {
                ctx.summary.scales_failed += 1;
                return (failed(0, e.to_string()), None);
            }
        };

        let evaluation = match (planned.replicas, trigger) {
            (Some(replicas), _) => Ok(Evaluation::Scale(replicas)),
            (None, Some(trigger)) => self.evaluator.evaluate(target, trigger, current, now).await,
            (None, None) => Ok(Evaluation::NoOp("no trigger".to_string())),
        };

        let desired = match evaluation {
            Ok(Evaluation::Scale(desired)) => desired,
            Ok(Evaluation::NoOp(reason)) => {
                debug!(target = %target, reason = %reason, "No scaling action");
                let decision =
                    ScalingDecision::new(target.clone(), current, current, DecisionOutcome::NoAction)
                        .with_note(reason);
                return (decision, None);
            }
            Err(e) => {
                ctx.summary.metrics_unavailable += 1;
                warn!(target = %target, error = %e, "Skipping target without metrics");
                let decision =
                    ScalingDecision::new(target.clone(), current, current, DecisionOutcome::NoAction)
                        .with_note(e.to_string());
                return (decision, None);
            }
        };

        let decision = match self
            .executor
            .apply(ctx, target, current, desired, options.dry_run)
            .await
        {
            Ok(decision) => decision,
            Err(e @ ScalerError::NotFound { .. }) => {
                ctx.summary.not_found += 1;
                return (failed(current, e.to_string()), None);
            }
            Err(e) => {
                ctx.summary.scales_failed += 1;
                let decision =
                    ScalingDecision::new(target.clone(), current, desired, DecisionOutcome::Failed)
                        .with_note(e.to_string());
                return (decision, None);
            }
        };

        match decision.outcome {
            DecisionOutcome::Applied => ctx.summary.scales_applied += 1,
            DecisionOutcome::DryRun => ctx.summary.dry_run_planned += 1,
            DecisionOutcome::Unchanged => ctx.summary.unchanged += 1,
            DecisionOutcome::SkippedByCap => ctx.summary.skipped_by_cap += 1,
            DecisionOutcome::NoAction | DecisionOutcome::Failed => {}
        }

        if decision.outcome != DecisionOutcome::Applied || !options.verify {
            return (decision, None);
        }

        let metric_triggered = planned.replicas.is_none() && trigger.map_or(false, TriggerSpec::is_metric);
        let grace = metric_triggered.then_some(options.grace_period);
        let verification = self
            .verifier
            .verify(target, desired, options.verify_timeout, grace)
            .await;

        (decision, Some(verification))
    }
}
