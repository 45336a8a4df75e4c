//! Scaling commands

use anyhow::{bail, Context, Result};
use kube::Client;
use scaler_lib::{
    cluster::{connect, KubeControlPlane},
    trigger::{load_schedule_file, ScheduleEntry},
    ExecutorConfig, MetricTrigger, MetricsServerSource, PrometheusSource, RunOptions,
    ScalingEngine, ScalingRequest, TriggerEvaluator, TriggerSpec,
};
use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::output::{print_report, print_warning, OutputFormat};
use crate::{Cli, MetricArgs, RunArgs, ScheduleArgs, TargetArgs};

/// Everything needed to run the engine once
#[derive(Debug, Clone)]
pub struct ScalePlan {
    pub request: ScalingRequest,
    pub trigger: Option<TriggerSpec>,
    pub options: RunOptions,
    pub executor: ExecutorConfig,
    pub prometheus_url: Option<String>,
}

/// Cluster connection plus file defaults
pub struct Session {
    client: Client,
    default_namespace: Option<String>,
    prometheus_url: Option<String>,
}

impl Session {
    pub async fn connect(cli: &Cli, settings: &Config) -> Result<Self> {
        let client = connect(cli.kubeconfig.as_deref(), cli.context.as_deref())
            .await
            .context("Failed to connect to Kubernetes")?;
        Ok(Self {
            client,
            default_namespace: settings.default_namespace.clone(),
            prometheus_url: settings.prometheus_url.clone(),
        })
    }
}

// clap requires exactly one of --name and --selector
fn target_request(target: &TargetArgs) -> ScalingRequest {
    match (&target.selector, &target.name) {
        (Some(selector), _) => ScalingRequest::Selector {
            kind: target.kind,
            selector: selector.clone(),
            namespace: target.namespace.clone(),
        },
        (None, name) => ScalingRequest::single(
            target.kind,
            name.clone().unwrap_or_default(),
            target.namespace.clone(),
        ),
    }
}

fn run_options(run: &RunArgs) -> RunOptions {
    RunOptions {
        dry_run: run.dry_run,
        force: run.force,
        max_operations: run.max_operations,
        verify: !run.no_verify,
        verify_timeout: Duration::from_secs(run.verify_timeout),
        ..Default::default()
    }
}

fn executor_config(run: &RunArgs) -> ExecutorConfig {
    ExecutorConfig {
        retries: run.retries,
        operation_timeout: Duration::from_secs(run.operation_timeout),
        ..Default::default()
    }
}

fn plan(request: ScalingRequest, trigger: Option<TriggerSpec>, run: &RunArgs) -> ScalePlan {
    ScalePlan {
        request,
        trigger,
        options: run_options(run),
        executor: executor_config(run),
        prometheus_url: None,
    }
}

pub fn fixed_plan(target: &TargetArgs, replicas: u32, run: &RunArgs) -> Result<ScalePlan> {
    Ok(plan(
        target_request(target),
        Some(TriggerSpec::Fixed { replicas }),
        run,
    ))
}

pub fn metric_plan(target: &TargetArgs, metric: &MetricArgs, run: &RunArgs) -> Result<ScalePlan> {
    let trigger = TriggerSpec::Metric(MetricTrigger {
        min: metric.min,
        max: metric.max,
        cpu_threshold_pct: metric.cpu_threshold,
        mem_threshold_pct: metric.mem_threshold,
        scaling_factor: metric.scaling_factor,
        step_size: metric.step_size,
        source: metric.source,
        query: metric.query.clone(),
    });
    trigger.validate()?;

    let mut scale_plan = plan(target_request(target), Some(trigger), run);
    scale_plan.options.grace_period = Duration::from_secs(metric.grace_period);
    scale_plan.prometheus_url = metric.prometheus_url.clone();
    Ok(scale_plan)
}

pub fn schedule_plan(
    target: &TargetArgs,
    schedule: &ScheduleArgs,
    run: &RunArgs,
) -> Result<ScalePlan> {
    let entries = match (&schedule.at, &schedule.schedule_file) {
        (Some(at), _) => {
            let replicas = schedule.replicas.context("--replicas is required with --at")?;
            vec![ScheduleEntry::new(at.clone(), replicas)]
        }
        (None, Some(path)) => load_schedule_file(path)
            .with_context(|| format!("Failed to load schedule file {}", path.display()))?,
        (None, None) => bail!("give --at or --schedule-file"),
    };
    let trigger = TriggerSpec::Schedule { entries };
    trigger.validate()?;

    Ok(plan(target_request(target), Some(trigger), run))
}

pub fn batch_plan(file: &Path, run: &RunArgs) -> Result<ScalePlan> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read batch file {}", file.display()))?;
    Ok(plan(ScalingRequest::Batch { content }, None, run))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Ask before mutating unless --force or --dry-run was given
fn confirm(scale_plan: &mut ScalePlan) -> Result<()> {
    if scale_plan.options.dry_run || scale_plan.options.force {
        return Ok(());
    }
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        bail!("refusing to scale without confirmation: pass --force or --dry-run");
    }

    let mode = scale_plan
        .trigger
        .as_ref()
        .map(TriggerSpec::mode)
        .unwrap_or("batch");
    print_warning(&format!(
        "About to scale {} ({} trigger)",
        scale_plan.request.describe(),
        mode
    ));
    eprint!("Proceed? [y/N] ");
    std::io::stderr().flush()?;

    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    if !is_affirmative(&answer) {
        bail!("aborted by user");
    }
    scale_plan.options.force = true;
    Ok(())
}

/// Run the plan against the cluster; true when every target succeeded
pub async fn execute(session: &Session, mut scale_plan: ScalePlan, format: OutputFormat) -> Result<bool> {
    confirm(&mut scale_plan)?;

    let mut cluster = KubeControlPlane::new(session.client.clone());
    if let Some(namespace) = &session.default_namespace {
        cluster = cluster.with_default_namespace(namespace.clone());
    }

    let mut evaluator = TriggerEvaluator::new()
        .with_source(Arc::new(MetricsServerSource::new(session.client.clone())));
    if let Some(url) = scale_plan
        .prometheus_url
        .as_ref()
        .or(session.prometheus_url.as_ref())
    {
        let source = PrometheusSource::new(url).context("Invalid Prometheus URL")?;
        evaluator = evaluator.with_source(Arc::new(source));
    }

    info!(
        request = %scale_plan.request.describe(),
        dry_run = scale_plan.options.dry_run,
        max_operations = ?scale_plan.options.max_operations,
        "Starting scaling run"
    );
    let engine = ScalingEngine::new(Arc::new(cluster), evaluator, scale_plan.executor.clone());
    let report = engine
        .run(
            &scale_plan.request,
            scale_plan.trigger.as_ref(),
            &scale_plan.options,
        )
        .await
        .with_context(|| format!("Scaling {} failed", scale_plan.request.describe()))?;

    print_report(&report, format)?;
    Ok(report.succeeded())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scaler_lib::{MetricsBackend, WorkloadKind};

    fn target(name: Option<&str>, selector: Option<&str>) -> TargetArgs {
        TargetArgs {
            kind: WorkloadKind::StatefulSet,
            name: name.map(String::from),
            selector: selector.map(String::from),
            namespace: Some("data".to_string()),
        }
    }

    fn run() -> RunArgs {
        RunArgs {
            dry_run: true,
            force: false,
            max_operations: Some(3),
            no_verify: false,
            verify_timeout: 120,
            retries: 1,
            operation_timeout: 10,
        }
    }

    #[test]
    fn test_fixed_plan() {
        let scale_plan = fixed_plan(&target(Some("db"), None), 4, &run()).unwrap();

        assert_eq!(
            scale_plan.request,
            ScalingRequest::single(WorkloadKind::StatefulSet, "db", Some("data".to_string()))
        );
        assert!(matches!(
            scale_plan.trigger,
            Some(TriggerSpec::Fixed { replicas: 4 })
        ));
        assert!(scale_plan.options.dry_run);
        assert_eq!(scale_plan.options.max_operations, Some(3));
        assert_eq!(scale_plan.options.verify_timeout, Duration::from_secs(120));
        assert_eq!(scale_plan.executor.retries, 1);
    }

    #[test]
    fn test_metric_plan_validates_bounds() {
        let metric = MetricArgs {
            min: 5,
            max: 2,
            cpu_threshold: 80,
            mem_threshold: 80,
            scaling_factor: 1.5,
            step_size: 1,
            source: MetricsBackend::MetricsServer,
            query: None,
            prometheus_url: None,
            grace_period: 30,
        };
        assert!(metric_plan(&target(None, Some("app=db")), &metric, &run()).is_err());
    }

    #[test]
    fn test_metric_plan_carries_grace_and_prometheus() {
        let metric = MetricArgs {
            min: 1,
            max: 8,
            cpu_threshold: 70,
            mem_threshold: 90,
            scaling_factor: 2.0,
            step_size: 2,
            source: MetricsBackend::Prometheus,
            query: Some("cpu{ns=\"{namespace}\"}".to_string()),
            prometheus_url: Some("http://prom:9090".to_string()),
            grace_period: 10,
        };
        let scale_plan = metric_plan(&target(None, Some("app=db")), &metric, &run()).unwrap();

        assert!(matches!(scale_plan.request, ScalingRequest::Selector { .. }));
        assert_eq!(scale_plan.options.grace_period, Duration::from_secs(10));
        assert_eq!(scale_plan.prometheus_url.as_deref(), Some("http://prom:9090"));
    }

    #[test]
    fn test_schedule_plan_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.txt");
        std::fs::write(&path, "# business hours\nweekdays 08:00,6\nweekdays 18:00,2\n").unwrap();
        let schedule = ScheduleArgs {
            at: None,
            replicas: None,
            schedule_file: Some(path),
        };

        let scale_plan = schedule_plan(&target(Some("db"), None), &schedule, &run()).unwrap();

        match scale_plan.trigger {
            Some(TriggerSpec::Schedule { entries }) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].replicas, 6);
            }
            other => panic!("unexpected trigger {:?}", other),
        }
    }

    #[test]
    fn test_batch_plan_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.csv");
        std::fs::write(&path, "deployment,web,shop,3\n").unwrap();

        let scale_plan = batch_plan(&path, &run()).unwrap();

        assert!(scale_plan.trigger.is_none());
        assert!(matches!(scale_plan.request, ScalingRequest::Batch { .. }));
        assert!(batch_plan(&dir.path().join("missing.csv"), &run()).is_err());
    }

    #[test]
    fn test_confirmation_answers() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("nope"));
    }

    #[test]
    fn test_dry_run_needs_no_confirmation() {
        let mut scale_plan = fixed_plan(&target(Some("db"), None), 4, &run()).unwrap();
        confirm(&mut scale_plan).unwrap();
        assert!(!scale_plan.options.force);
    }
}
