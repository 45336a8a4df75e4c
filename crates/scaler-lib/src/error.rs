//! Error types for the scaling engine

use std::time::Duration;
use thiserror::Error;

use crate::models::WorkloadKind;

/// Errors raised while resolving, evaluating, applying or verifying
#[derive(Debug, Error)]
pub enum ScalerError {
    /// Target workload or namespace does not exist
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: WorkloadKind,
        name: String,
        namespace: String,
    },

    /// Selector or batch matched nothing
    #[error("no targets resolved: {0}")]
    EmptyResult(String),

    /// Malformed request, trigger or input line
    #[error("validation failed: {0}")]
    Validation(String),

    /// Control-plane scale call failed
    #[error("scale of {target} failed: {message}")]
    ScaleCommand { target: String, message: String },

    /// Post-scale health check did not converge
    #[error("{target} not ready after {timeout:?} ({ready}/{desired} replicas ready)")]
    VerificationTimeout {
        target: String,
        timeout: Duration,
        ready: u32,
        desired: u32,
    },

    /// Metrics source unreachable or empty
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScalerError {
    /// Errors that abort the whole run instead of a single target
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, ScalerError::Validation(_) | ScalerError::EmptyResult(_))
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ScalerError::Validation(message.into())
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ScalerError>;
