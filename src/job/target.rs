//! Resolve what the user asked to trace into a node (and maybe a container)
//!
//! Accepted forms:
//! - `node-1` or `node/node-1`: trace the whole node
//! - `pod/web-0`: trace one container of a pod; the pod is looked up to find
//!   its node and UID

use crate::k8s::{ClusterApi, ClusterError};

use super::request::PodTarget;

/// Parsed trace target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    Pod(String),
}

/// Where the trace job will run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub hostname: String,
    pub pod: Option<PodTarget>,
}

#[derive(Debug)]
pub enum TargetError {
    /// Unknown `<kind>/` prefix or empty name
    Invalid(String),
    /// No pod with that name in the namespace
    PodNotFound { pod: String, namespace: String },
    /// Pod is not assigned to a node yet
    Unscheduled(String),
    /// Pod has several containers and none was chosen
    AmbiguousContainer { pod: String, containers: Vec<String> },
    /// Chosen container does not exist in the pod
    UnknownContainer { pod: String, container: String },
    Cluster(ClusterError),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetError::Invalid(target) => write!(
                f,
                "invalid target '{}': expected <node>, node/<node> or pod/<pod>",
                target
            ),
            TargetError::PodNotFound { pod, namespace } => {
                write!(f, "pod {} not found in namespace {}", pod, namespace)
            }
            TargetError::Unscheduled(pod) => {
                write!(f, "pod {} is not scheduled on any node", pod)
            }
            TargetError::AmbiguousContainer { pod, containers } => write!(
                f,
                "pod {} has multiple containers ({}), choose one with --container",
                pod,
                containers.join(", ")
            ),
            TargetError::UnknownContainer { pod, container } => {
                write!(f, "container {} not found in pod {}", container, pod)
            }
            TargetError::Cluster(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TargetError {}

impl From<ClusterError> for TargetError {
    fn from(e: ClusterError) -> Self {
        TargetError::Cluster(e)
    }
}

impl std::str::FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let target = match s.split_once('/') {
            None => Target::Node(s.to_string()),
            Some(("node", name)) | Some(("nodes", name)) => Target::Node(name.to_string()),
            Some(("pod", name)) | Some(("pods", name)) | Some(("po", name)) => {
                Target::Pod(name.to_string())
            }
            Some(_) => return Err(TargetError::Invalid(s.to_string())),
        };

        match &target {
            Target::Node(name) | Target::Pod(name) if name.is_empty() => {
                Err(TargetError::Invalid(s.to_string()))
            }
            _ => Ok(target),
        }
    }
}

impl Target {
    /// Turn the target into a placement, querying the pod if needed
    pub async fn resolve<C: ClusterApi>(
        &self,
        api: &C,
        namespace: &str,
        container: Option<&str>,
    ) -> Result<Placement, TargetError> {
        let pod_name = match self {
            Target::Node(node) => {
                return Ok(Placement {
                    hostname: node.clone(),
                    pod: None,
                })
            }
            Target::Pod(name) => name,
        };

        let pod = api.get_pod(namespace, pod_name).await.map_err(|e| {
            if e.is_not_found() {
                TargetError::PodNotFound {
                    pod: pod_name.clone(),
                    namespace: namespace.to_string(),
                }
            } else {
                TargetError::Cluster(e)
            }
        })?;
        if pod.spec.node_name.is_empty() {
            return Err(TargetError::Unscheduled(pod_name.clone()));
        }

        let names: Vec<String> = pod.spec.containers.iter().map(|c| c.name.clone()).collect();
        let container_name = match container {
            Some(wanted) if names.iter().any(|n| n == wanted) => wanted.to_string(),
            Some(wanted) => {
                return Err(TargetError::UnknownContainer {
                    pod: pod_name.clone(),
                    container: wanted.to_string(),
                })
            }
            None if names.len() == 1 => names[0].clone(),
            None => {
                return Err(TargetError::AmbiguousContainer {
                    pod: pod_name.clone(),
                    containers: names,
                })
            }
        };

        Ok(Placement {
            hostname: pod.spec.node_name,
            pod: Some(PodTarget {
                pod_uid: pod.metadata.uid,
                container_name,
            }),
        })
    }
}
