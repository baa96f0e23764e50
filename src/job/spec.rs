//! Trace job construction
//!
//! Turns a [`TraceRequest`] into the two objects submitted to the cluster:
//! a ConfigMap holding the program and a Job running it. This is a pure
//! transform; nothing here talks to the API server.
//!
//! # What the Job looks like
//!
//! ```text
//! Job (activeDeadlineSeconds = deadline + grace, backoffLimit 1)
//! └── Pod (hostPID, privileged, pinned to one node, tolerates taints)
//!     ├── init: kubectl-trace-init        ← only with HeaderMounts::Fetch
//!     └── trace container
//!         timeout --signal INT <deadline> trace-runner -b /programs/program
//!         preStop: SIGINT the tracer, sleep <grace>
//! ```
//!
//! The runtime sends SIGTERM/SIGKILL once the deadline passes. SIGINT from
//! both `timeout` and the preStop hook makes the tracer print its maps
//! first, and the grace sleep keeps the container alive while it does.

use std::collections::BTreeMap;

use crate::k8s::{
    Affinity, ConfigMap, ConfigMapVolumeSource, Container, ExecAction, Job, JobSpec, Lifecycle,
    LifecycleHandler, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext, Toleration, Volume,
    VolumeMount,
};
use crate::meta::LabelConfig;

use super::request::TraceRequest;

/// Node label used for pinning
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// ConfigMap key (and file name) of the program
const PROGRAM_KEY: &str = "program";
const PROGRAM_DIR: &str = "/programs";
const TRACE_RUNNER: &str = "/bin/trace-runner";
const INIT_CONTAINER_NAME: &str = "kubectl-trace-init";

/// Seconds a finished Job lingers before garbage collection
const TTL_SECONDS_AFTER_FINISHED: i32 = 5;

/// How kernel headers reach the trace container
///
/// The two plans never share a mount: each one is a complete, separate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderMounts {
    /// Reuse the headers and modules already present on the host
    Host,
    /// Stage generated headers with an init container first
    Fetch { init_image: String },
}

impl HeaderMounts {
    pub fn for_request(request: &TraceRequest) -> Self {
        if request.fetch_headers {
            HeaderMounts::Fetch {
                init_image: request.init_image.clone(),
            }
        } else {
            HeaderMounts::Host
        }
    }

    /// Host volumes this plan needs
    pub fn volumes(&self) -> Vec<Volume> {
        match self {
            HeaderMounts::Host => vec![
                Volume::host_path("usr-host", "/usr"),
                Volume::host_path("modules-host", "/lib/modules"),
            ],
            HeaderMounts::Fetch { .. } => vec![
                Volume::host_path("lsb-release", "/etc/lsb-release"),
                Volume::host_path("os-release", "/etc/os-release"),
                Volume::host_path("modules-host", "/lib/modules"),
                Volume::host_path("modules-dir", "/var/cache/linux-headers/modules_dir"),
                Volume::host_path(
                    "linux-headers-generated",
                    "/var/cache/linux-headers/generated",
                ),
            ],
        }
    }

    /// Header mounts of the trace container, all read-only
    pub fn trace_mounts(&self) -> Vec<VolumeMount> {
        match self {
            HeaderMounts::Host => vec![
                VolumeMount::new("usr-host", "/usr-host", true),
                VolumeMount::new("modules-host", "/lib/modules", true),
            ],
            HeaderMounts::Fetch { .. } => vec![
                VolumeMount::new("modules-dir", "/lib/modules", true),
                VolumeMount::new("modules-host", "/lib/modules.host", true),
                VolumeMount::new("linux-headers-generated", "/usr/src/kernels", true),
            ],
        }
    }

    /// Init containers that prepare the mounts
    pub fn init_containers(&self) -> Vec<Container> {
        match self {
            HeaderMounts::Host => Vec::new(),
            HeaderMounts::Fetch { init_image } => vec![Container {
                name: INIT_CONTAINER_NAME.to_string(),
                image: init_image.clone(),
                resources: trace_resources(),
                volume_mounts: vec![
                    VolumeMount::new("lsb-release", "/etc/lsb-release.host", true),
                    VolumeMount::new("os-release", "/etc/os-release.host", true),
                    VolumeMount::new("modules-dir", "/lib/modules", false),
                    VolumeMount::new("modules-host", "/lib/modules.host", true),
                    VolumeMount::new("linux-headers-generated", "/usr/src/", false),
                ],
                ..Default::default()
            }],
        }
    }
}

/// A ConfigMap and the Job that mounts it
///
/// Only [`build`] creates one, so the pair always carries the same labels.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceBundle {
    config_map: ConfigMap,
    job: Job,
}

impl TraceBundle {
    pub fn config_map(&self) -> &ConfigMap {
        &self.config_map
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn into_parts(self) -> (ConfigMap, Job) {
        (self.config_map, self.job)
    }
}

/// Command line of the trace container
pub fn trace_command(request: &TraceRequest) -> Vec<String> {
    let mut command: Vec<String> = vec![
        "/usr/bin/timeout".to_string(),
        "--preserve-status".to_string(),
        "--signal".to_string(),
        "INT".to_string(),
        request.deadline_seconds.to_string(),
        TRACE_RUNNER.to_string(),
        "-b".to_string(),
        format!("{}/{}", PROGRAM_DIR, PROGRAM_KEY),
    ];

    if let Some(pod) = &request.pod {
        command.push("--inpod".to_string());
        command.push(format!("--container={}", pod.container_name));
        command.push(format!("--poduid={}", pod.pod_uid));
    }

    command
}

fn pre_stop_hook(grace_period_seconds: i64) -> Lifecycle {
    Lifecycle {
        pre_stop: Some(LifecycleHandler {
            exec: Some(ExecAction {
                command: vec![
                    "/bin/bash".to_string(),
                    "-c".to_string(),
                    format!(
                        "kill -SIGINT $(pidof bpftrace) && sleep {}",
                        grace_period_seconds
                    ),
                ],
            }),
        }),
    }
}

/// Fixed requests/limits for trace and init containers
fn trace_resources() -> ResourceRequirements {
    let quantities = |cpu: &str, memory: &str| {
        let mut map = BTreeMap::new();
        map.insert("cpu".to_string(), cpu.to_string());
        map.insert("memory".to_string(), memory.to_string());
        map
    };

    ResourceRequirements {
        requests: quantities("100m", "100Mi"),
        limits: quantities("1", "1G"),
    }
}

fn node_affinity(hostname: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: vec![NodeSelectorRequirement {
                        key: HOSTNAME_LABEL.to_string(),
                        operator: "In".to_string(),
                        values: vec![hostname.to_string()],
                    }],
                }],
            }),
        }),
    }
}

/// Build the ConfigMap/Job pair for a request
pub fn build(request: &TraceRequest, labels: &LabelConfig) -> TraceBundle {
    let meta = labels.object_meta(&request.name, &request.id, &request.namespace);
    let headers = HeaderMounts::for_request(request);

    let mut data = BTreeMap::new();
    data.insert(PROGRAM_KEY.to_string(), request.program.clone());
    let config_map = ConfigMap::new(meta.clone(), data);

    let mut volumes = vec![
        Volume {
            name: "program".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.metadata.name.clone(),
                default_mode: Some(0o777),
            }),
            host_path: None,
        },
        Volume::host_path("sys", "/sys"),
    ];
    volumes.extend(headers.volumes());

    let mut volume_mounts = vec![
        VolumeMount::new("program", PROGRAM_DIR, true),
        VolumeMount::new("sys", "/sys", true),
    ];
    volume_mounts.extend(headers.trace_mounts());

    let trace_container = Container {
        name: request.name.clone(),
        image: request.image.clone(),
        command: trace_command(request),
        tty: true,
        stdin: true,
        resources: trace_resources(),
        volume_mounts,
        security_context: Some(SecurityContext {
            privileged: Some(true),
        }),
        lifecycle: Some(pre_stop_hook(request.grace_period_seconds)),
    };

    let pod_spec = PodSpec {
        host_pid: true,
        service_account_name: request.service_account.clone(),
        node_name: String::new(),
        volumes,
        init_containers: headers.init_containers(),
        containers: vec![trace_container],
        restart_policy: "Never".to_string(),
        affinity: Some(node_affinity(&request.target_hostname)),
        tolerations: vec![Toleration {
            effect: "NoSchedule".to_string(),
            operator: "Exists".to_string(),
        }],
    };

    let job = Job::new(
        meta.clone(),
        JobSpec {
            active_deadline_seconds: Some(request.active_deadline_seconds()),
            ttl_seconds_after_finished: Some(TTL_SECONDS_AFTER_FINISHED),
            parallelism: Some(1),
            completions: Some(1),
            backoff_limit: Some(1),
            template: PodTemplateSpec {
                metadata: meta,
                spec: pod_spec,
            },
        },
    );

    TraceBundle { config_map, job }
}
