//! Integration tests for the trace job lifecycle
//!
//! These tests drive TraceJobManager against an in-memory cluster that
//! honours label selectors, records every delete, and can be told to fail.

use std::sync::Mutex;

use async_trait::async_trait;

use ktrace::job::{
    JobFilter, PodTarget, Target, TargetError, TraceDefaults, TraceError, TraceJobManager,
    TraceRequest, TraceStatus,
};
use ktrace::k8s::{
    ClusterApi, ClusterError, ConfigMap, Container, DeleteOptions, Job, JobStatus, ObjectMeta,
    Pod, PodSpec,
};
use ktrace::LabelConfig;

#[derive(Default)]
struct FakeCluster {
    config_maps: Mutex<Vec<ConfigMap>>,
    jobs: Mutex<Vec<Job>>,
    pods: Mutex<Vec<Pod>>,
    /// (kind, namespace, name) of every delete call
    deletes: Mutex<Vec<(String, String, String)>>,
    fail_job_create: bool,
    /// Fail the delete of the job with this name
    fail_job_delete: Option<String>,
    fail_pod_lookup: bool,
    /// Fail every list call
    fail_lists: bool,
}

fn api_error(code: u16, message: &str) -> ClusterError {
    ClusterError::Api {
        code,
        reason: String::new(),
        message: message.to_string(),
    }
}

/// Label selector match for `key=value` or bare `key`
fn matches(meta: &ObjectMeta, namespace: Option<&str>, selector: &str) -> bool {
    if let Some(ns) = namespace {
        if meta.namespace != ns {
            return false;
        }
    }
    match selector.split_once('=') {
        Some((key, value)) => meta.labels.get(key).map(String::as_str) == Some(value),
        None => meta.labels.contains_key(selector),
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        let mut stored = self.config_maps.lock().unwrap();
        if stored.iter().any(|c| {
            c.metadata.name == config_map.metadata.name
                && c.metadata.namespace == config_map.metadata.namespace
        }) {
            return Err(api_error(409, "configmap already exists"));
        }
        stored.push(config_map.clone());
        Ok(config_map.clone())
    }

    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError> {
        if self.fail_job_create {
            return Err(api_error(403, "jobs.batch is forbidden"));
        }
        let mut created = job.clone();
        created.status = Some(JobStatus {
            active: 1,
            ..Default::default()
        });
        self.jobs.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn list_jobs(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<Job>, ClusterError> {
        if self.fail_lists {
            return Err(api_error(500, "list jobs should not be called"));
        }
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| matches(&j.metadata, namespace, selector))
            .cloned()
            .collect())
    }

    async fn list_config_maps(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<ConfigMap>, ClusterError> {
        if self.fail_lists {
            return Err(api_error(500, "list configmaps should not be called"));
        }
        Ok(self
            .config_maps
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches(&c.metadata, namespace, selector))
            .cloned()
            .collect())
    }

    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ClusterError> {
        assert_eq!(options, &DeleteOptions::foreground_now());
        if self.fail_job_delete.as_deref() == Some(name) {
            return Err(api_error(500, "etcd unavailable"));
        }
        self.deletes
            .lock()
            .unwrap()
            .push(("job".to_string(), namespace.to_string(), name.to_string()));
        self.jobs
            .lock()
            .unwrap()
            .retain(|j| !(j.metadata.namespace == namespace && j.metadata.name == name));
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.deletes
            .lock()
            .unwrap()
            .push(("configmap".to_string(), namespace.to_string(), name.to_string()));
        self.config_maps
            .lock()
            .unwrap()
            .retain(|c| !(c.metadata.namespace == namespace && c.metadata.name == name));
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        if self.fail_pod_lookup {
            return Err(api_error(403, "pods is forbidden"));
        }
        self.pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.metadata.namespace == namespace && p.metadata.name == name)
            .cloned()
            .ok_or_else(|| api_error(404, "pod not found"))
    }
}

fn request(id: &str, namespace: &str, node: &str) -> TraceRequest {
    TraceRequest::new(
        id,
        namespace,
        node,
        "tracepoint:syscalls:sys_enter_openat { @[comm] = count(); }",
        &LabelConfig::default(),
        &TraceDefaults::default(),
    )
}

fn manager(cluster: FakeCluster, namespace: Option<&str>) -> TraceJobManager<FakeCluster> {
    TraceJobManager::new(cluster, LabelConfig::default(), namespace.map(String::from))
}

#[tokio::test]
async fn test_create_then_get_by_id() {
    let mgr = manager(FakeCluster::default(), Some("default"));
    mgr.create(&request("id-1", "default", "node-a")).await.unwrap();
    mgr.create(&request("id-2", "default", "node-b")).await.unwrap();

    let traces = mgr.get(&JobFilter::by_id("id-1")).await.unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].id, "id-1");
    assert_eq!(traces[0].name, "kubectl-trace-id-1");
    assert_eq!(traces[0].hostname, "node-a");
    assert_eq!(traces[0].namespace, "default");
    assert_eq!(traces[0].status, TraceStatus::Running);
}

#[tokio::test]
async fn test_create_pairs_configmap_and_job() {
    let mgr = manager(FakeCluster::default(), Some("default"));
    let job = mgr.create(&request("id-1", "default", "node-a")).await.unwrap();

    let cluster = mgr.api();
    let config_maps = cluster.config_maps.lock().unwrap();
    assert_eq!(config_maps.len(), 1);
    assert_eq!(config_maps[0].metadata.labels, job.metadata.labels);
}

#[tokio::test]
async fn test_failed_job_create_leaves_configmap() {
    let cluster = FakeCluster {
        fail_job_create: true,
        ..Default::default()
    };
    let mgr = manager(cluster, Some("default"));

    let err = mgr
        .create(&request("id-1", "default", "node-a"))
        .await
        .unwrap_err();
    assert!(matches!(err, TraceError::Cluster(ClusterError::Api { code: 403, .. })));

    assert_eq!(mgr.api().config_maps.lock().unwrap().len(), 1);
    assert!(mgr.api().jobs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_name_is_rejected_by_cluster() {
    let mgr = manager(FakeCluster::default(), Some("default"));
    let mut first = request("id-1", "default", "node-a");
    first.name = "my-trace".to_string();
    let mut second = request("id-2", "default", "node-a");
    second.name = "my-trace".to_string();

    mgr.create(&first).await.unwrap();
    let err = mgr.create(&second).await.unwrap_err();
    match err {
        TraceError::Cluster(e) => assert!(e.is_conflict()),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_get_by_name_and_all() {
    let mgr = manager(FakeCluster::default(), None);
    let mut a = request("id-1", "default", "node-a");
    a.name = "shared".to_string();
    let mut b = request("id-2", "monitoring", "node-b");
    b.name = "shared".to_string();
    mgr.create(&a).await.unwrap();
    mgr.create(&b).await.unwrap();
    mgr.create(&request("id-3", "default", "node-c")).await.unwrap();

    assert_eq!(mgr.get(&JobFilter::by_name("shared")).await.unwrap().len(), 2);
    assert_eq!(mgr.get(&JobFilter::all()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_get_is_scoped_to_namespace() {
    let mgr = manager(FakeCluster::default(), Some("default"));
    mgr.create(&request("id-1", "default", "node-a")).await.unwrap();
    mgr.create(&request("id-2", "monitoring", "node-b")).await.unwrap();

    let traces = mgr.get(&JobFilter::all()).await.unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].id, "id-1");
}

#[tokio::test]
async fn test_get_degrades_on_missing_affinity() {
    let cluster = FakeCluster::default();
    let labels = LabelConfig::default();
    cluster.jobs.lock().unwrap().push(Job {
        metadata: labels.object_meta("broken", "id-x", "default"),
        status: Some(JobStatus {
            failed: 1,
            ..Default::default()
        }),
        ..Default::default()
    });
    let mgr = manager(cluster, Some("default"));
    mgr.create(&request("id-1", "default", "node-a")).await.unwrap();

    let traces = mgr.get(&JobFilter::all()).await.unwrap();
    assert_eq!(traces.len(), 2);
    let broken = traces.iter().find(|t| t.id == "id-x").unwrap();
    assert_eq!(broken.hostname, "");
    assert_eq!(broken.status, TraceStatus::Failed);
}

#[tokio::test]
async fn test_delete_removes_jobs_then_configmaps() {
    let mgr = manager(FakeCluster::default(), Some("default"));
    mgr.create(&request("id-1", "default", "node-a")).await.unwrap();
    mgr.create(&request("id-2", "default", "node-b")).await.unwrap();

    let mut out = Vec::new();
    let report = mgr.delete(&JobFilter::by_id("id-1"), &mut out).await.unwrap();

    assert_eq!(report.jobs, vec!["kubectl-trace-id-1".to_string()]);
    assert_eq!(report.config_maps, vec!["kubectl-trace-id-1".to_string()]);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "trace job kubectl-trace-id-1 deleted\ntrace configuration kubectl-trace-id-1 deleted\n"
    );

    let deletes = mgr.api().deletes.lock().unwrap().clone();
    assert_eq!(deletes[0].0, "job");
    assert_eq!(deletes[1].0, "configmap");

    assert_eq!(mgr.get(&JobFilter::all()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_nothing_found() {
    let mgr = manager(FakeCluster::default(), Some("default"));
    mgr.create(&request("id-1", "default", "node-a")).await.unwrap();

    let mut out = Vec::new();
    let report = mgr
        .delete(&JobFilter::by_id("does-not-exist"), &mut out)
        .await
        .unwrap();

    assert!(report.is_empty());
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "error: no trace found to be deleted\n"
    );
    assert!(mgr.api().deletes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_selector_skips_cluster_queries() {
    let cluster = FakeCluster {
        fail_lists: true,
        ..Default::default()
    };
    let labels = LabelConfig {
        id_label_key: String::new(),
        ..LabelConfig::default()
    };
    let mgr = TraceJobManager::new(cluster, labels, Some("default".to_string()));

    assert!(mgr.get(&JobFilter::all()).await.unwrap().is_empty());

    let mut out = Vec::new();
    let report = mgr.delete(&JobFilter::all(), &mut out).await.unwrap();
    assert!(report.is_empty());
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "error: no trace found to be deleted\n"
    );
    assert!(mgr.api().deletes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_stops_at_first_failure() {
    let cluster = FakeCluster {
        fail_job_delete: Some("kubectl-trace-id-1".to_string()),
        ..Default::default()
    };
    let mgr = manager(cluster, Some("default"));
    mgr.create(&request("id-1", "default", "node-a")).await.unwrap();

    let mut out = Vec::new();
    assert!(mgr.delete(&JobFilter::all(), &mut out).await.is_err());

    // The job pass failed, so the configmap pass never ran
    assert!(mgr.api().deletes.lock().unwrap().is_empty());
    assert_eq!(mgr.api().config_maps.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_cleans_orphaned_configmap() {
    let cluster = FakeCluster {
        fail_job_create: true,
        ..Default::default()
    };
    let mgr = manager(cluster, Some("default"));
    let _ = mgr.create(&request("id-1", "default", "node-a")).await;

    let mut out = Vec::new();
    let report = mgr.delete(&JobFilter::by_id("id-1"), &mut out).await.unwrap();
    assert!(report.jobs.is_empty());
    assert_eq!(report.config_maps.len(), 1);
}

#[tokio::test]
async fn test_isolated_label_config() {
    let labels = LabelConfig {
        name_label_key: "example.com/tracer".to_string(),
        id_label_key: "example.com/tracer-id".to_string(),
        object_name_prefix: "tracer-".to_string(),
    };
    let mgr = TraceJobManager::new(FakeCluster::default(), labels.clone(), None);
    let req = TraceRequest::new(
        "id-1",
        "default",
        "node-a",
        "BEGIN { exit(); }",
        &labels,
        &TraceDefaults::default(),
    );
    mgr.create(&req).await.unwrap();

    let stored = mgr.api().jobs.lock().unwrap()[0].metadata.labels.clone();
    assert!(stored.contains_key("example.com/tracer-id"));
    assert!(!stored.contains_key("iovisor.org/kubectl-trace-id"));

    let traces = mgr.get(&JobFilter::by_id("id-1")).await.unwrap();
    assert_eq!(traces[0].name, "tracer-id-1");
}

fn pod(name: &str, node: &str, containers: &[&str]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: "default".to_string(),
            uid: format!("uid-{}", name),
            ..Default::default()
        },
        spec: PodSpec {
            node_name: node.to_string(),
            containers: containers
                .iter()
                .map(|c| Container {
                    name: c.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn test_resolve_pod_target() {
    let cluster = FakeCluster::default();
    cluster.pods.lock().unwrap().push(pod("web-0", "node-9", &["app"]));

    let placement = Target::Pod("web-0".to_string())
        .resolve(&cluster, "default", None)
        .await
        .unwrap();
    assert_eq!(placement.hostname, "node-9");
    assert_eq!(
        placement.pod,
        Some(PodTarget {
            pod_uid: "uid-web-0".to_string(),
            container_name: "app".to_string(),
        })
    );
}

#[tokio::test]
async fn test_resolve_pod_target_errors() {
    let cluster = FakeCluster::default();
    cluster
        .pods
        .lock()
        .unwrap()
        .push(pod("multi", "node-1", &["app", "sidecar"]));
    cluster.pods.lock().unwrap().push(pod("pending", "", &["app"]));

    let target = Target::Pod("multi".to_string());
    assert!(matches!(
        target.resolve(&cluster, "default", None).await,
        Err(TargetError::AmbiguousContainer { .. })
    ));
    assert!(matches!(
        target.resolve(&cluster, "default", Some("db")).await,
        Err(TargetError::UnknownContainer { .. })
    ));
    assert!(target
        .resolve(&cluster, "default", Some("sidecar"))
        .await
        .is_ok());

    assert!(matches!(
        Target::Pod("pending".to_string())
            .resolve(&cluster, "default", None)
            .await,
        Err(TargetError::Unscheduled(_))
    ));
    match Target::Pod("ghost".to_string())
        .resolve(&cluster, "default", None)
        .await
    {
        Err(TargetError::PodNotFound { pod, namespace }) => {
            assert_eq!(pod, "ghost");
            assert_eq!(namespace, "default");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_resolve_pod_surfaces_other_cluster_errors() {
    let cluster = FakeCluster {
        fail_pod_lookup: true,
        ..Default::default()
    };
    assert!(matches!(
        Target::Pod("web-0".to_string())
            .resolve(&cluster, "default", None)
            .await,
        Err(TargetError::Cluster(ClusterError::Api { code: 403, .. }))
    ));
}

#[tokio::test]
async fn test_node_target_needs_no_lookup() {
    let placement = Target::Node("node-1".to_string())
        .resolve(&FakeCluster::default(), "default", None)
        .await
        .unwrap();
    assert_eq!(placement.hostname, "node-1");
    assert!(placement.pod.is_none());
}
