//! kscale - Kubernetes workload scaling CLI
//!
//! Scales deployments, statefulsets and replicasets to a fixed count, by
//! live CPU/memory usage, by time schedule, or from a batch file.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use commands::scale;
use scaler_lib::{trigger::TimeMatcher, MetricsBackend, WorkloadKind};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Kubernetes workload scaling CLI
#[derive(Parser)]
#[command(name = "kscale")]
#[command(author, version, about = "Scale Kubernetes workloads by count, metrics or schedule", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Output format
    #[arg(long, short, global = true)]
    pub format: Option<output::OutputFormat>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scale to a fixed replica count
    Fixed {
        #[command(flatten)]
        target: TargetArgs,

        /// Desired replica count
        #[arg(long, short)]
        replicas: u32,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Scale by live CPU and memory usage
    Metric {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        metric: MetricArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Scale when a time rule matches the current minute
    Schedule {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        schedule: ScheduleArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Scale every workload listed in a file of `type,name,namespace,replicas` lines
    Batch {
        /// Batch file path
        #[arg(long)]
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

/// Which workloads to act on
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Workload type (deployment, statefulset, replicaset)
    #[arg(long, short = 't', default_value = "deployment")]
    pub kind: WorkloadKind,

    /// Workload name
    #[arg(long, conflicts_with = "selector", required_unless_present = "selector")]
    pub name: Option<String>,

    /// Label selector; all namespaces unless --namespace is given
    #[arg(long, short = 'l')]
    pub selector: Option<String>,

    /// Namespace (defaults to the kubeconfig context namespace)
    #[arg(long, short)]
    pub namespace: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct MetricArgs {
    /// Lower replica bound
    #[arg(long, default_value_t = 1)]
    pub min: u32,

    /// Upper replica bound
    #[arg(long, default_value_t = 10)]
    pub max: u32,

    /// CPU usage threshold in percent
    #[arg(long, default_value_t = 80)]
    pub cpu_threshold: u32,

    /// Memory usage threshold in percent
    #[arg(long, default_value_t = 80)]
    pub mem_threshold: u32,

    /// Multiplier applied to the usage ratio when scaling up
    #[arg(long, default_value_t = 1.5)]
    pub scaling_factor: f64,

    /// Largest replica change per decision
    #[arg(long, default_value_t = 1)]
    pub step_size: u32,

    /// Metrics backend (metrics-server, prometheus)
    #[arg(long, default_value = "metrics-server")]
    pub source: MetricsBackend,

    /// PromQL template for CPU percent; {namespace}, {name}, {kind} are substituted
    #[arg(long)]
    pub query: Option<String>,

    /// Prometheus base URL
    #[arg(long, env = "KSCALE_PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Seconds to wait before the first readiness poll
    #[arg(long, default_value_t = 30)]
    pub grace_period: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ScheduleArgs {
    /// Time rule: "HH:MM", "weekdays 08:00", "sat 22:30" or a cron expression
    #[arg(long, requires = "replicas", conflicts_with = "schedule_file")]
    pub at: Option<TimeMatcher>,

    /// Replica count for --at
    #[arg(long, short)]
    pub replicas: Option<u32>,

    /// File of `<time rule>,<replicas>` lines; the first matching line wins
    #[arg(long, required_unless_present = "at")]
    pub schedule_file: Option<PathBuf>,
}

/// Flags shared by every scaling command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Show what would change without scaling
    #[arg(long)]
    pub dry_run: bool,

    /// Scale without asking for confirmation
    #[arg(long)]
    pub force: bool,

    /// Stop after this many scale operations
    #[arg(long)]
    pub max_operations: Option<u32>,

    /// Skip waiting for scaled workloads to become ready
    #[arg(long)]
    pub no_verify: bool,

    /// Seconds to wait for readiness after scaling
    #[arg(long, default_value_t = 300)]
    pub verify_timeout: u64,

    /// Extra attempts after a failed scale call
    #[arg(long, default_value_t = 2)]
    pub retries: u32,

    /// Seconds allowed for a single scale call
    #[arg(long, default_value_t = 60)]
    pub operation_timeout: u64,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.log_file.is_some() {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let writer = Mutex::new(file);
            if cli.log_json {
                registry.with(fmt::layer().json().with_writer(writer)).init();
            } else {
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .init();
            }
        }
        None => {
            if cli.log_json {
                registry
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            } else {
                registry
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .init();
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let settings = config::Config::load()?;
    let format = cli
        .format
        .or_else(|| settings.output_format())
        .unwrap_or_default();

    let plan = match &cli.command {
        Commands::Fixed {
            target,
            replicas,
            run,
        } => scale::fixed_plan(target, *replicas, run)?,
        Commands::Metric {
            target,
            metric,
            run,
        } => scale::metric_plan(target, metric, run)?,
        Commands::Schedule {
            target,
            schedule,
            run,
        } => scale::schedule_plan(target, schedule, run)?,
        Commands::Batch { file, run } => scale::batch_plan(file, run)?,
    };

    let session = scale::Session::connect(&cli, &settings).await?;
    let succeeded = scale::execute(&session, plan, format).await?;

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
