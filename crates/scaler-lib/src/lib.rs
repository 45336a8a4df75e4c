//! Workload scaling decision engine
//!
//! This crate provides the core functionality for:
//! - Resolving scaling requests into workload targets
//! - Evaluating fixed, metric and schedule triggers
//! - Applying replica counts with dry-run and an operations cap
//! - Verifying that scaled workloads become ready
//! - Health checks and observability

pub mod cluster;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod resolver;
pub mod trigger;
pub mod verifier;

pub use cluster::{ClusterControlPlane, InMemoryCluster, KubeControlPlane};
pub use context::RunContext;
pub use engine::{RunOptions, RunReport, ScalingEngine};
pub use error::{Result, ScalerError};
pub use executor::{ExecutorConfig, ScalingExecutor};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use metrics::{MetricsSource, MetricsServerSource, PrometheusSource, StaticMetrics};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
pub use resolver::{ScalingRequest, TargetResolver};
pub use trigger::{Evaluation, MetricTrigger, MetricsBackend, TriggerEvaluator, TriggerSpec};
pub use verifier::{HealthVerifier, VerificationReport, VerifyOutcome};
