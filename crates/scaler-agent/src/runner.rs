//! Interval loop around the scaling engine

use scaler_lib::{
    HealthRegistry, RunOptions, RunReport, ScalerError, ScalingEngine, ScalingRequest, TriggerSpec,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub struct Runner {
    engine: ScalingEngine,
    request: ScalingRequest,
    trigger: TriggerSpec,
    options: RunOptions,
    health: HealthRegistry,
}

impl Runner {
    pub fn new(
        engine: ScalingEngine,
        request: ScalingRequest,
        trigger: TriggerSpec,
        options: RunOptions,
        health: HealthRegistry,
    ) -> Self {
        Self {
            engine,
            request,
            trigger,
            options,
            health,
        }
    }

    /// One scaling run; failures only update component health
    pub async fn run_once(&self) -> Option<RunReport> {
        match self
            .engine
            .run(&self.request, Some(&self.trigger), &self.options)
            .await
        {
            Ok(report) => {
                self.health.record_run(&report.summary).await;
                Some(report)
            }
            Err(ScalerError::Kube(e)) => {
                error!(error = %e, "Kubernetes API unavailable");
                self.health.record_cluster_error(e.to_string()).await;
                None
            }
            Err(e) => {
                error!(error = %e, request = %self.request.describe(), "Scaling run failed");
                self.health.record_run_error(e.to_string()).await;
                None
            }
        }
    }

    /// Run every `interval` until `shutdown` flips to true
    pub async fn run_until(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Stopping scaling loop");
                        break;
                    }
                }
            }
        }
    }
}
