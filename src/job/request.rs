//! Trace request: everything needed to build one trace job

use crate::meta::LabelConfig;

/// Defaults applied by callers when building a [`TraceRequest`]
#[derive(Debug, Clone)]
pub struct TraceDefaults {
    /// Image running the trace-runner
    pub image: String,
    /// Image staging kernel headers when `fetch_headers` is set
    pub init_image: String,
    /// Hard timeout for the trace program, in seconds
    pub deadline_seconds: i64,
    /// Extra time given to the program to flush output after SIGINT
    pub grace_period_seconds: i64,
    pub service_account: String,
}

impl Default for TraceDefaults {
    fn default() -> Self {
        Self {
            image: "quay.io/iovisor/kubectl-trace-bpftrace:latest".to_string(),
            init_image: "quay.io/iovisor/kubectl-trace-init:latest".to_string(),
            deadline_seconds: 3600,
            grace_period_seconds: 10,
            service_account: "default".to_string(),
        }
    }
}

/// Container selected inside a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTarget {
    pub pod_uid: String,
    pub container_name: String,
}

/// A request to run one trace program on one node
///
/// `name` is chosen by the caller and may collide; `id` must be unique and is
/// the key used to find the trace again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRequest {
    pub name: String,
    pub id: String,
    pub namespace: String,
    pub service_account: String,
    /// Node the trace is pinned to
    pub target_hostname: String,
    /// Program source, mounted verbatim into the trace container
    pub program: String,
    /// Set when tracing a single container rather than the whole node
    pub pod: Option<PodTarget>,
    pub image: String,
    pub init_image: String,
    /// Stage kernel headers with an init container instead of using the host's
    pub fetch_headers: bool,
    pub deadline_seconds: i64,
    pub grace_period_seconds: i64,
}

impl TraceRequest {
    /// Request for a node-wide trace with a generated name
    pub fn new(
        id: impl Into<String>,
        namespace: impl Into<String>,
        target_hostname: impl Into<String>,
        program: impl Into<String>,
        labels: &LabelConfig,
        defaults: &TraceDefaults,
    ) -> Self {
        let id = id.into();
        Self {
            name: labels.object_name(&id),
            id,
            namespace: namespace.into(),
            service_account: defaults.service_account.clone(),
            target_hostname: target_hostname.into(),
            program: program.into(),
            pod: None,
            image: defaults.image.clone(),
            init_image: defaults.init_image.clone(),
            fetch_headers: false,
            deadline_seconds: defaults.deadline_seconds,
            grace_period_seconds: defaults.grace_period_seconds,
        }
    }

    pub fn is_pod(&self) -> bool {
        self.pod.is_some()
    }

    /// Job-level deadline: program timeout plus flush window
    pub fn active_deadline_seconds(&self) -> i64 {
        self.deadline_seconds + self.grace_period_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let request = TraceRequest::new(
            "abc",
            "default",
            "node-1",
            "kprobe:do_sys_open {}",
            &LabelConfig::default(),
            &TraceDefaults::default(),
        );

        assert_eq!(request.name, "kubectl-trace-abc");
        assert_eq!(request.deadline_seconds, 3600);
        assert_eq!(request.grace_period_seconds, 10);
        assert_eq!(request.active_deadline_seconds(), 3610);
        assert!(!request.is_pod());
        assert!(!request.fetch_headers);
    }
}
