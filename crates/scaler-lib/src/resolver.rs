//! Target resolution
//!
//! Expands a scaling request (one name, a label selector, or a batch list)
//! into the concrete targets the engine acts on.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cluster::ClusterControlPlane;
use crate::error::{Result, ScalerError};
use crate::models::{ScalingTarget, WorkloadKind};

/// What the caller asked to scale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingRequest {
    /// One named workload; namespace defaults to the control plane's
    Single {
        kind: WorkloadKind,
        name: String,
        namespace: Option<String>,
    },
    /// Every workload of a kind matching a label selector; all namespaces when none is given
    Selector {
        kind: WorkloadKind,
        selector: String,
        namespace: Option<String>,
    },
    /// Lines of `type,name,namespace,replicas`
    Batch { content: String },
}

impl ScalingRequest {
    pub fn single(kind: WorkloadKind, name: impl Into<String>, namespace: Option<String>) -> Self {
        ScalingRequest::Single {
            kind,
            name: name.into(),
            namespace,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ScalingRequest::Single { kind, name, .. } => format!("{} {}", kind, name),
            ScalingRequest::Selector { kind, selector, .. } => {
                format!("{} matching '{}'", kind, selector)
            }
            ScalingRequest::Batch { .. } => "batch".to_string(),
        }
    }
}

/// One parsed batch record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub target: ScalingTarget,
    pub replicas: u32,
}

/// Parse batch records, skipping blank lines and `#` comments.
///
/// Malformed lines are logged and counted, never fatal. An empty namespace
/// field falls back to `default_namespace`.
pub fn parse_batch(content: &str, default_namespace: &str) -> (Vec<BatchEntry>, u32) {
    let mut entries = Vec::new();
    let mut malformed = 0;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_batch_line(line, default_namespace) {
            Ok(entry) => entries.push(entry),
            Err(reason) => {
                malformed += 1;
                warn!(line = idx + 1, content = %line, reason = %reason, "Skipping malformed batch line");
            }
        }
    }

    (entries, malformed)
}

fn parse_batch_line(line: &str, default_namespace: &str) -> std::result::Result<BatchEntry, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 4 {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    }

    let kind: WorkloadKind = fields[0].parse().map_err(|e: ScalerError| e.to_string())?;
    if fields[1].is_empty() {
        return Err("empty workload name".to_string());
    }
    let namespace = if fields[2].is_empty() {
        default_namespace
    } else {
        fields[2]
    };
    let replicas: u32 = fields[3]
        .parse()
        .map_err(|_| format!("invalid replica count '{}'", fields[3]))?;

    Ok(BatchEntry {
        target: ScalingTarget::new(kind, fields[1], namespace),
        replicas,
    })
}

/// A resolved target, with the replica count a batch line pinned for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTarget {
    pub target: ScalingTarget,
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub targets: Vec<PlannedTarget>,
    /// Batch entries dropped by the operations cap
    pub truncated: u32,
    pub malformed_lines: u32,
}

#[derive(Clone)]
pub struct TargetResolver {
    cluster: Arc<dyn ClusterControlPlane>,
}

impl TargetResolver {
    pub fn new(cluster: Arc<dyn ClusterControlPlane>) -> Self {
        Self { cluster }
    }

    pub async fn resolve(
        &self,
        request: &ScalingRequest,
        max_operations: Option<u32>,
    ) -> Result<Resolution> {
        match request {
            ScalingRequest::Single {
                kind,
                name,
                namespace,
            } => {
                let namespace = namespace
                    .as_deref()
                    .unwrap_or_else(|| self.cluster.default_namespace());
                let target = ScalingTarget::new(*kind, name.as_str(), namespace);
                if self.cluster.get_workload(&target).await?.is_none() {
                    return Err(ScalerError::NotFound {
                        kind: *kind,
                        name: name.clone(),
                        namespace: namespace.to_string(),
                    });
                }
                Ok(Resolution {
                    targets: vec![PlannedTarget {
                        target,
                        replicas: None,
                    }],
                    ..Default::default()
                })
            }
            ScalingRequest::Selector {
                kind,
                selector,
                namespace,
            } => {
                let refs = self
                    .cluster
                    .list_workloads(*kind, selector, namespace.as_deref())
                    .await?;
                if refs.is_empty() {
                    return Err(ScalerError::EmptyResult(format!(
                        "no {} matches selector '{}'",
                        kind, selector
                    )));
                }
                debug!(kind = %kind, selector = %selector, matches = refs.len(), "Resolved selector");
                Ok(Resolution {
                    targets: refs
                        .into_iter()
                        .map(|r| PlannedTarget {
                            target: ScalingTarget::new(*kind, r.name, r.namespace),
                            replicas: None,
                        })
                        .collect(),
                    ..Default::default()
                })
            }
            ScalingRequest::Batch { content } => {
                let (entries, malformed_lines) =
                    parse_batch(content, self.cluster.default_namespace());
                if entries.is_empty() {
                    return Err(ScalerError::EmptyResult(format!(
                        "batch contains no valid entries ({} malformed)",
                        malformed_lines
                    )));
                }

                let mut targets: Vec<PlannedTarget> = entries
                    .into_iter()
                    .map(|e| PlannedTarget {
                        target: e.target,
                        replicas: Some(e.replicas),
                    })
                    .collect();

                let mut truncated = 0;
                if let Some(cap) = max_operations {
                    let cap = cap as usize;
                    if targets.len() > cap {
                        truncated = (targets.len() - cap) as u32;
                        targets.truncate(cap);
                        warn!(
                            max_operations = cap,
                            skipped = truncated,
                            "Batch truncated by operations cap"
                        );
                    }
                }

                Ok(Resolution {
                    targets,
                    truncated,
                    malformed_lines,
                })
            }
        }
    }
}
