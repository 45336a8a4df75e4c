//! Workload Scaler - interval-driven scaling daemon
//!
//! Runs in-cluster, re-evaluating one scaling request every interval so
//! schedule triggers fire in their minute and metric triggers follow load.

use anyhow::{Context, Result};
use scaler_agent::{api, config::ScalerConfig, runner::Runner};
use scaler_lib::{
    cluster::{connect, KubeControlPlane},
    health::HealthRegistry,
    observability::{ScalerMetrics, StructuredLogger},
    MetricsServerSource, PrometheusSource, ScalingEngine, TriggerEvaluator,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting workload-scaler");

    let config = ScalerConfig::load()?;
    let request = config.request()?;
    let trigger = config.trigger()?;
    trigger.validate().context("invalid trigger")?;
    info!(
        instance = %config.instance_name,
        interval_secs = config.interval_secs,
        trigger = trigger.mode(),
        "Scaler configured"
    );

    let health_registry = HealthRegistry::new();

    let metrics = ScalerMetrics::new();

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(SCALER_VERSION, &request.describe(), trigger.mode());

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let client = connect(config.kubeconfig.as_deref(), config.context.as_deref())
        .await
        .context("failed to connect to Kubernetes")?;

    let mut cluster = KubeControlPlane::new(client.clone());
    if let Some(namespace) = &config.namespace {
        cluster = cluster.with_default_namespace(namespace.clone());
    }

    let mut evaluator =
        TriggerEvaluator::new().with_source(Arc::new(MetricsServerSource::new(client)));
    if let Some(url) = &config.prometheus_url {
        let source = PrometheusSource::new(url).context("invalid prometheus_url")?;
        evaluator = evaluator.with_source(Arc::new(source));
    }

    let engine = ScalingEngine::new(Arc::new(cluster), evaluator, config.executor_config())
        .with_logger(logger.clone());
    let runner = Runner::new(
        engine,
        request,
        trigger,
        config.run_options(),
        health_registry.clone(),
    );

    health_registry.set_ready(true).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGINT");
                std::future::pending::<()>().await;
            }
        }
    });

    runner
        .run_until(Duration::from_secs(config.interval_secs), shutdown_rx)
        .await;

    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
