//! Scaler daemon configuration
//!
//! Read from an optional file (`SCALER_CONFIG`, default
//! `/etc/workload-scaler/config.toml`) and then from `SCALER_*` environment
//! variables. Nested keys use `__`, e.g. `SCALER_TRIGGER__REPLICAS`.
//! Triggers other than `fixed` are best written in the file, where numbers
//! keep their types.

use anyhow::{bail, Context, Result};
use scaler_lib::{
    trigger::load_schedule_file, ExecutorConfig, RunOptions, ScalingRequest, TriggerSpec,
    WorkloadKind,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/workload-scaler/config.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ScalerConfig {
    /// Name used in structured logs, from the downward API when available
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between scaling runs
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_kind")]
    pub kind: WorkloadKind,

    /// Single workload to scale; exclusive with `selector`
    pub name: Option<String>,

    /// Label selector of workloads to scale
    pub selector: Option<String>,

    pub namespace: Option<String>,

    pub trigger: Option<TriggerSpec>,

    /// Schedule file, used instead of `trigger`
    pub schedule_file: Option<PathBuf>,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub force: bool,

    pub max_operations: Option<u32>,

    #[serde(default = "default_true")]
    pub verify: bool,

    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Prometheus base URL; enables the `prometheus` metrics source
    pub prometheus_url: Option<String>,

    pub kubeconfig: Option<PathBuf>,

    pub context: Option<String>,
}

fn default_instance_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "workload-scaler".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    60
}

fn default_kind() -> WorkloadKind {
    WorkloadKind::Deployment
}

fn default_true() -> bool {
    true
}

fn default_verify_timeout() -> u64 {
    300
}

fn default_grace_period() -> u64 {
    30
}

fn default_retries() -> u32 {
    2
}

fn default_operation_timeout() -> u64 {
    60
}

impl ScalerConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("SCALER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SCALER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;

        let parsed: ScalerConfig = config
            .try_deserialize()
            .context("invalid scaler configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        self.request()?;
        if self.trigger.is_some() == self.schedule_file.is_some() {
            bail!("exactly one of `trigger` or `schedule_file` must be set");
        }
        if !self.dry_run && !self.force {
            bail!("the daemon scales unattended: set `force = true` or `dry_run = true`");
        }
        if self.interval_secs == 0 {
            bail!("`interval_secs` must be at least 1");
        }
        Ok(())
    }

    pub fn request(&self) -> Result<ScalingRequest> {
        match (&self.name, &self.selector) {
            (Some(name), None) => Ok(ScalingRequest::single(
                self.kind,
                name.clone(),
                self.namespace.clone(),
            )),
            (None, Some(selector)) => Ok(ScalingRequest::Selector {
                kind: self.kind,
                selector: selector.clone(),
                namespace: self.namespace.clone(),
            }),
            _ => bail!("exactly one of `name` or `selector` must be set"),
        }
    }

    /// The configured trigger, reading the schedule file when one is set
    pub fn trigger(&self) -> Result<TriggerSpec> {
        if let Some(path) = &self.schedule_file {
            let entries = load_schedule_file(path)
                .with_context(|| format!("failed to load schedule {}", path.display()))?;
            return Ok(TriggerSpec::Schedule { entries });
        }
        self.trigger
            .clone()
            .context("no trigger configured")
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            force: self.force,
            max_operations: self.max_operations,
            verify: self.verify,
            verify_timeout: Duration::from_secs(self.verify_timeout_secs),
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            retries: self.retries,
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_toml(content: &str) -> Result<ScalerConfig> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        ScalerConfig::load_from(file.path())
    }

    #[test]
    fn test_defaults_with_fixed_trigger() {
        let config = load_toml(
            r#"
name = "web"
force = true

[trigger]
mode = "fixed"
replicas = 3
"#,
        )
        .unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.kind, WorkloadKind::Deployment);
        assert!(config.verify);
        assert_eq!(config.run_options().verify_timeout, Duration::from_secs(300));
        assert_eq!(config.executor_config().retries, 2);
        assert!(matches!(
            config.trigger().unwrap(),
            TriggerSpec::Fixed { replicas: 3 }
        ));
        assert_eq!(
            config.request().unwrap(),
            ScalingRequest::single(WorkloadKind::Deployment, "web", None)
        );
    }

    #[test]
    fn test_metric_trigger_with_selector() {
        let config = load_toml(
            r#"
kind = "statefulset"
selector = "app=db"
namespace = "data"
dry_run = true

[trigger]
mode = "metric"
min = 2
max = 6
cpu_threshold_pct = 70
source = "prometheus"
"#,
        )
        .unwrap();

        match config.trigger().unwrap() {
            TriggerSpec::Metric(metric) => {
                assert_eq!(metric.min, 2);
                assert_eq!(metric.max, 6);
                assert_eq!(metric.cpu_threshold_pct, 70);
                assert_eq!(metric.mem_threshold_pct, 80);
            }
            other => panic!("unexpected trigger {:?}", other),
        }
        assert!(matches!(config.request().unwrap(), ScalingRequest::Selector { .. }));
    }

    #[test]
    fn test_schedule_entries_in_file() {
        let config = load_toml(
            r#"
name = "web"
force = true

[trigger]
mode = "schedule"

[[trigger.entries]]
at = "weekdays 08:00"
replicas = 5

[[trigger.entries]]
at = "0 20 * * *"
replicas = 1
"#,
        )
        .unwrap();

        match config.trigger().unwrap() {
            TriggerSpec::Schedule { entries } => assert_eq!(entries.len(), 2),
            other => panic!("unexpected trigger {:?}", other),
        }
    }

    #[test]
    fn test_unattended_scaling_requires_force() {
        let err = load_toml(
            r#"
name = "web"

[trigger]
mode = "fixed"
replicas = 3
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("force"));
    }

    #[test]
    fn test_name_and_selector_are_exclusive() {
        assert!(load_toml(
            r#"
name = "web"
selector = "app=web"
force = true

[trigger]
mode = "fixed"
replicas = 3
"#,
        )
        .is_err());
    }
}
