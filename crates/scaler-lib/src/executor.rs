//! Scaling executor
//!
//! Applies a desired replica count to one target. Equal counts never reach
//! the control plane, dry runs only record, and every mutation draws from
//! the run's operations budget.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cluster::ClusterControlPlane;
use crate::context::RunContext;
use crate::error::{Result, ScalerError};
use crate::models::{DecisionOutcome, ScalingDecision, ScalingTarget};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Extra attempts after a failed scale call
    pub retries: u32,
    pub retry_backoff: Duration,
    /// Deadline for a single scale call
    pub operation_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_backoff: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct ScalingExecutor {
    cluster: Arc<dyn ClusterControlPlane>,
    config: ExecutorConfig,
}

impl ScalingExecutor {
    pub fn new(cluster: Arc<dyn ClusterControlPlane>, config: ExecutorConfig) -> Self {
        Self { cluster, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Apply `desired` to `target`.
    ///
    /// Returns `ScaleCommand` once every attempt has failed; the caller owns
    /// recording that as a failed decision.
    pub async fn apply(
        &self,
        ctx: &mut RunContext,
        target: &ScalingTarget,
        current: u32,
        desired: u32,
        dry_run: bool,
    ) -> Result<ScalingDecision> {
        if desired == current {
            debug!(target = %target, replicas = current, "Already at desired replicas");
            return Ok(ScalingDecision::new(
                target.clone(),
                current,
                desired,
                DecisionOutcome::Unchanged,
            ));
        }

        if !ctx.try_consume_operation() {
            warn!(target = %target, "Operations cap reached, skipping");
            return Ok(ScalingDecision::new(
                target.clone(),
                current,
                desired,
                DecisionOutcome::SkippedByCap,
            )
            .with_note("max operations reached"));
        }

        if dry_run {
            info!(target = %target, from = current, to = desired, "Dry run, not scaling");
            return Ok(ScalingDecision::new(
                target.clone(),
                current,
                desired,
                DecisionOutcome::DryRun,
            ));
        }

        self.scale_with_retries(target, desired).await?;

        info!(target = %target, from = current, to = desired, "Scaled workload");
        Ok(ScalingDecision::new(
            target.clone(),
            current,
            desired,
            DecisionOutcome::Applied,
        ))
    }

    async fn scale_with_retries(&self, target: &ScalingTarget, replicas: u32) -> Result<()> {
        let attempts = self.config.retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(
                self.config.operation_timeout,
                self.cluster.scale(target, replicas),
            )
            .await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e @ ScalerError::NotFound { .. })) => return Err(e),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "scale call timed out after {}s",
                        self.config.operation_timeout.as_secs()
                    )
                }
            }

            if attempt < attempts {
                warn!(
                    target = %target,
                    attempt = attempt,
                    error = %last_error,
                    "Scale attempt failed, retrying"
                );
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }

        Err(ScalerError::ScaleCommand {
            target: target.to_string(),
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::models::WorkloadKind;

    fn target() -> ScalingTarget {
        ScalingTarget::new(WorkloadKind::Deployment, "web", "default")
    }

    fn setup() -> (Arc<InMemoryCluster>, ScalingExecutor) {
        let cluster = Arc::new(InMemoryCluster::default());
        cluster.insert(&target(), 2, &[]);
        let config = ExecutorConfig {
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let executor = ScalingExecutor::new(cluster.clone(), config);
        (cluster, executor)
    }

    #[tokio::test]
    async fn test_equal_count_makes_no_call() {
        let (cluster, executor) = setup();
        let mut ctx = RunContext::new(Some(1));

        for current in 0..5 {
            let decision = executor
                .apply(&mut ctx, &target(), current, current, false)
                .await
                .unwrap();
            assert_eq!(decision.outcome, DecisionOutcome::Unchanged);
            assert!(!decision.applied);
        }

        assert!(cluster.scale_calls().is_empty());
        assert_eq!(ctx.remaining_operations(), Some(1));
    }

    #[tokio::test]
    async fn test_dry_run_never_mutates() {
        let (cluster, executor) = setup();
        let mut ctx = RunContext::new(None);

        let decision = executor.apply(&mut ctx, &target(), 2, 4, true).await.unwrap();

        assert_eq!(decision.outcome, DecisionOutcome::DryRun);
        assert!(!decision.applied);
        assert!(cluster.scale_calls().is_empty());
        assert_eq!(cluster.replicas(&target()), Some(2));
    }

    #[tokio::test]
    async fn test_apply_scales() {
        let (cluster, executor) = setup();
        let mut ctx = RunContext::new(None);

        let decision = executor.apply(&mut ctx, &target(), 2, 4, false).await.unwrap();

        assert!(decision.applied);
        assert_eq!(cluster.replicas(&target()), Some(4));
    }

    #[tokio::test]
    async fn test_budget_exhausted_skips() {
        let (cluster, executor) = setup();
        let mut ctx = RunContext::new(Some(0));

        let decision = executor.apply(&mut ctx, &target(), 2, 4, false).await.unwrap();

        assert_eq!(decision.outcome, DecisionOutcome::SkippedByCap);
        assert!(cluster.scale_calls().is_empty());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let (cluster, executor) = setup();
        cluster.fail_scale(&target(), 2);
        let mut ctx = RunContext::new(None);

        let decision = executor.apply(&mut ctx, &target(), 2, 3, false).await.unwrap();

        assert!(decision.applied);
        assert_eq!(cluster.scale_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_is_scale_command_error() {
        let (cluster, executor) = setup();
        cluster.fail_scale(&target(), 10);
        let mut ctx = RunContext::new(None);

        let err = executor
            .apply(&mut ctx, &target(), 2, 3, false)
            .await
            .unwrap_err();

        assert!(matches!(err, ScalerError::ScaleCommand { .. }));
        assert!(!err.is_fatal_for_run());
        assert_eq!(cluster.scale_calls().len(), 3);
    }
}
