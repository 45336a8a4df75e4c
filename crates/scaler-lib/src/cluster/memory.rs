//! In-memory control plane
//!
//! Holds workloads in a map and records every scale call. Ready-replica
//! reports can be scripted per target to drive the health verifier.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use super::ClusterControlPlane;
use crate::error::{Result, ScalerError};
use crate::models::{PodInfo, ScalingTarget, WorkloadKind, WorkloadRef, WorkloadStatus};

#[derive(Debug, Clone, Default)]
struct Workload {
    replicas: u32,
    ready_replicas: u32,
    labels: BTreeMap<String, String>,
    pods: Vec<PodInfo>,
}

impl Workload {
    fn selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    fn matches(&self, selector: &str) -> bool {
        selector
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .all(|term| match term.split_once('=') {
                Some((k, v)) => self.labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
                None => self.labels.contains_key(term),
            })
    }
}

#[derive(Default)]
struct State {
    workloads: HashMap<ScalingTarget, Workload>,
    /// Scripted ready counts per poll; `None` means the workload vanished
    ready_scripts: HashMap<ScalingTarget, VecDeque<Option<u32>>>,
    /// Remaining scale calls that should fail, per target
    scale_failures: HashMap<ScalingTarget, u32>,
    scale_calls: Vec<(ScalingTarget, u32)>,
}

/// Control plane kept in process memory
pub struct InMemoryCluster {
    default_namespace: String,
    state: Mutex<State>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new("default")
    }
}

impl InMemoryCluster {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Add a workload whose pods are all ready
    pub fn insert(&self, target: &ScalingTarget, replicas: u32, labels: &[(&str, &str)]) {
        let workload = Workload {
            replicas,
            ready_replicas: replicas,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            pods: Vec::new(),
        };
        self.with_state(|s| {
            s.workloads.insert(target.clone(), workload);
        });
    }

    pub fn remove(&self, target: &ScalingTarget) {
        self.with_state(|s| {
            s.workloads.remove(target);
        });
    }

    /// Attach pods to a workload for `list_pods`
    pub fn set_pods(&self, target: &ScalingTarget, pods: Vec<PodInfo>) {
        self.with_state(|s| {
            if let Some(w) = s.workloads.get_mut(target) {
                w.pods = pods;
            }
        });
    }

    /// Ready counts reported by successive `get_workload` calls; the last one sticks
    pub fn script_ready(&self, target: &ScalingTarget, script: impl IntoIterator<Item = Option<u32>>) {
        self.with_state(|s| {
            s.ready_scripts
                .insert(target.clone(), script.into_iter().collect());
        });
    }

    /// Make the next `times` scale calls for a target fail
    pub fn fail_scale(&self, target: &ScalingTarget, times: u32) {
        self.with_state(|s| {
            s.scale_failures.insert(target.clone(), times);
        });
    }

    /// Every scale call received, in order
    pub fn scale_calls(&self) -> Vec<(ScalingTarget, u32)> {
        self.with_state(|s| s.scale_calls.clone())
    }

    pub fn replicas(&self, target: &ScalingTarget) -> Option<u32> {
        self.with_state(|s| s.workloads.get(target).map(|w| w.replicas))
    }
}

#[async_trait]
impl ClusterControlPlane for InMemoryCluster {
    fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    async fn get_workload(&self, target: &ScalingTarget) -> Result<Option<WorkloadStatus>> {
        Ok(self.with_state(|s| {
            let scripted = match s.ready_scripts.get_mut(target) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().copied(),
                None => None,
            };
            match scripted {
                Some(None) => {
                    s.workloads.remove(target);
                    None
                }
                Some(Some(ready)) => s.workloads.get_mut(target).map(|w| {
                    w.ready_replicas = ready;
                    WorkloadStatus {
                        replicas: w.replicas,
                        ready_replicas: ready,
                        selector: w.selector(),
                    }
                }),
                None => s.workloads.get(target).map(|w| WorkloadStatus {
                    replicas: w.replicas,
                    ready_replicas: w.ready_replicas,
                    selector: w.selector(),
                }),
            }
        }))
    }

    async fn list_workloads(
        &self,
        kind: WorkloadKind,
        selector: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<WorkloadRef>> {
        Ok(self.with_state(|s| {
            let mut refs: Vec<WorkloadRef> = s
                .workloads
                .iter()
                .filter(|(t, w)| {
                    t.kind == kind
                        && namespace.map_or(true, |ns| t.namespace == ns)
                        && w.matches(selector)
                })
                .map(|(t, _)| WorkloadRef {
                    name: t.name.clone(),
                    namespace: t.namespace.clone(),
                })
                .collect();
            refs.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
            refs
        }))
    }

    async fn scale(&self, target: &ScalingTarget, replicas: u32) -> Result<()> {
        self.with_state(|s| {
            s.scale_calls.push((target.clone(), replicas));

            if let Some(remaining) = s.scale_failures.get_mut(target) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ScalerError::ScaleCommand {
                        target: target.to_string(),
                        message: "injected failure".to_string(),
                    });
                }
            }

            let workload = s.workloads.get_mut(target).ok_or_else(|| ScalerError::NotFound {
                kind: target.kind,
                name: target.name.clone(),
                namespace: target.namespace.clone(),
            })?;
            workload.replicas = replicas;
            if !s.ready_scripts.contains_key(target) {
                workload.ready_replicas = replicas;
            }
            Ok(())
        })
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodInfo>> {
        Ok(self.with_state(|s| {
            s.workloads
                .iter()
                .filter(|(t, w)| t.namespace == namespace && w.matches(selector))
                .flat_map(|(_, w)| w.pods.iter().cloned())
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web() -> ScalingTarget {
        ScalingTarget::new(WorkloadKind::Deployment, "web", "default")
    }

    #[tokio::test]
    async fn test_scale_updates_replicas() {
        let cluster = InMemoryCluster::default();
        cluster.insert(&web(), 2, &[("app", "web")]);

        cluster.scale(&web(), 5).await.unwrap();

        let status = cluster.get_workload(&web()).await.unwrap().unwrap();
        assert_eq!(status.replicas, 5);
        assert_eq!(status.ready_replicas, 5);
        assert_eq!(cluster.scale_calls(), vec![(web(), 5)]);
    }

    #[tokio::test]
    async fn test_list_by_selector_and_namespace() {
        let cluster = InMemoryCluster::default();
        cluster.insert(&web(), 1, &[("app", "web"), ("tier", "front")]);
        cluster.insert(
            &ScalingTarget::new(WorkloadKind::Deployment, "web", "staging"),
            1,
            &[("app", "web")],
        );
        cluster.insert(
            &ScalingTarget::new(WorkloadKind::StatefulSet, "db", "default"),
            1,
            &[("app", "web")],
        );

        let all = cluster
            .list_workloads(WorkloadKind::Deployment, "app=web", None)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let scoped = cluster
            .list_workloads(WorkloadKind::Deployment, "app=web,tier=front", Some("default"))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].namespace, "default");
    }

    #[tokio::test]
    async fn test_ready_script_and_vanish() {
        let cluster = InMemoryCluster::default();
        cluster.insert(&web(), 3, &[]);
        cluster.script_ready(&web(), [Some(1), None]);

        let first = cluster.get_workload(&web()).await.unwrap().unwrap();
        assert_eq!(first.ready_replicas, 1);
        assert!(cluster.get_workload(&web()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_scale_failure() {
        let cluster = InMemoryCluster::default();
        cluster.insert(&web(), 1, &[]);
        cluster.fail_scale(&web(), 1);

        assert!(cluster.scale(&web(), 2).await.is_err());
        assert!(cluster.scale(&web(), 2).await.is_ok());
        assert_eq!(cluster.replicas(&web()), Some(2));
    }
}
