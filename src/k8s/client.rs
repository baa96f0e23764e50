//! Kubernetes API client
//!
//! [`ClusterApi`] is the seam between the trace job lifecycle and the
//! cluster: the manager only ever talks to this trait. [`KubeClient`] is the
//! production implementation, speaking plain REST to the API server with
//! reqwest. Tests substitute an in-memory implementation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::config::ClusterConfig;
use super::resources::{ConfigMap, DeleteOptions, Job, ObjectList, Pod, Status};
use crate::metrics::API_REQUEST_DURATION;

/// Error type for cluster API operations
#[derive(Debug)]
pub enum ClusterError {
    /// Transport failure (connection refused, TLS, timeout)
    Request(reqwest::Error),
    /// The API server answered with a non-success status
    Api {
        code: u16,
        reason: String,
        message: String,
    },
    /// Response body was not the expected JSON
    Parse(serde_json::Error),
    /// Client could not be configured
    Config(String),
    Io(std::io::Error),
}

impl ClusterError {
    /// True if the server rejected the request because the object exists
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Api { code: 409, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Api { code: 404, .. })
    }
}

impl std::fmt::Display for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterError::Request(e) => write!(f, "Request error: {}", e),
            ClusterError::Api {
                code,
                reason,
                message,
            } => {
                if reason.is_empty() {
                    write!(f, "API error ({}): {}", code, message)
                } else {
                    write!(f, "API error ({} {}): {}", code, reason, message)
                }
            }
            ClusterError::Parse(e) => write!(f, "Parse error: {}", e),
            ClusterError::Config(msg) => write!(f, "Client configuration error: {}", msg),
            ClusterError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        ClusterError::Request(e)
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(e: serde_json::Error) -> Self {
        ClusterError::Parse(e)
    }
}

impl From<std::io::Error> for ClusterError {
    fn from(e: std::io::Error) -> Self {
        ClusterError::Io(e)
    }
}

/// Operations the trace lifecycle needs from the cluster
///
/// `namespace: None` on list calls means all namespaces. Selectors are
/// label selector strings (`key=value` or bare `key`).
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError>;

    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError>;

    async fn list_jobs(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<Job>, ClusterError>;

    async fn list_config_maps(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<ConfigMap>, ClusterError>;

    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ClusterError>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError>;
}

/// Resource collections we address
#[derive(Debug, Clone, Copy)]
enum Collection {
    ConfigMaps,
    Jobs,
    Pods,
}

impl Collection {
    fn group_path(self) -> &'static str {
        match self {
            Collection::ConfigMaps | Collection::Pods => "/api/v1",
            Collection::Jobs => "/apis/batch/v1",
        }
    }

    fn plural(self) -> &'static str {
        match self {
            Collection::ConfigMaps => "configmaps",
            Collection::Jobs => "jobs",
            Collection::Pods => "pods",
        }
    }
}

/// REST client for the Kubernetes API server
#[derive(Clone)]
pub struct KubeClient {
    server: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl KubeClient {
    /// Create a new client from connection settings
    pub fn new(config: &ClusterConfig) -> Result<Self, ClusterError> {
        let mut builder = reqwest::Client::builder();

        if let Some(pem) = &config.ca_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| ClusterError::Config(format!("invalid CA bundle: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        if config.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;

        Ok(Self {
            server: config.server.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            client,
        })
    }

    /// URL of a collection, cluster-wide when `namespace` is None
    fn collection_url(&self, collection: Collection, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!(
                "{}{}/namespaces/{}/{}",
                self.server,
                collection.group_path(),
                ns,
                collection.plural()
            ),
            None => format!(
                "{}{}/{}",
                self.server,
                collection.group_path(),
                collection.plural()
            ),
        }
    }

    fn object_url(&self, collection: Collection, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_url(collection, Some(namespace)), name)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and decode the JSON response body
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClusterError> {
        let body = self.send_raw(operation, request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Send a request, turning non-2xx answers into `ClusterError::Api`
    async fn send_raw(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<u8>, ClusterError> {
        let _timer = API_REQUEST_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let res = self.authorize(request).send().await?;
        let status = res.status();
        let body = res.bytes().await?.to_vec();
        debug!(operation, status = status.as_u16(), "cluster API call");

        if !status.is_success() {
            let parsed: Status = serde_json::from_slice(&body).unwrap_or_default();
            let message = if parsed.message.is_empty() {
                String::from_utf8_lossy(&body).into_owned()
            } else {
                parsed.message
            };
            return Err(ClusterError::Api {
                code: status.as_u16(),
                reason: parsed.reason,
                message,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap, ClusterError> {
        let url = self.collection_url(Collection::ConfigMaps, Some(&config_map.metadata.namespace));
        self.send("create_config_map", self.client.post(url).json(config_map))
            .await
    }

    async fn create_job(&self, job: &Job) -> Result<Job, ClusterError> {
        let url = self.collection_url(Collection::Jobs, Some(&job.metadata.namespace));
        self.send("create_job", self.client.post(url).json(job)).await
    }

    async fn list_jobs(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<Job>, ClusterError> {
        let url = self.collection_url(Collection::Jobs, namespace);
        let request = self.client.get(url).query(&[("labelSelector", selector)]);
        let list: ObjectList<Job> = self.send("list_jobs", request).await?;
        Ok(list.items)
    }

    async fn list_config_maps(
        &self,
        namespace: Option<&str>,
        selector: &str,
    ) -> Result<Vec<ConfigMap>, ClusterError> {
        let url = self.collection_url(Collection::ConfigMaps, namespace);
        let request = self.client.get(url).query(&[("labelSelector", selector)]);
        let list: ObjectList<ConfigMap> = self.send("list_config_maps", request).await?;
        Ok(list.items)
    }

    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<(), ClusterError> {
        let url = self.object_url(Collection::Jobs, namespace, name);
        self.send_raw("delete_job", self.client.delete(url).json(options))
            .await?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let url = self.object_url(Collection::ConfigMaps, namespace, name);
        self.send_raw("delete_config_map", self.client.delete(url))
            .await?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        let url = self.object_url(Collection::Pods, namespace, name);
        self.send("get_pod", self.client.get(url)).await
    }
}
