//! Trace Job Manager - creates, lists and deletes trace jobs
//!
//! The TraceJobManager is responsible for:
//! - Submitting the ConfigMap/Job pair for a trace (ConfigMap first, so the
//!   Job's program volume has something to mount)
//! - Listing traces by label and summarizing node and status
//! - Deleting every Job and ConfigMap matching a filter
//!
//! Nothing here retries or rolls back. A Job that fails to create after its
//! ConfigMap succeeded leaves the ConfigMap behind; a delete that fails
//! midway leaves the rest for the next delete.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::k8s::{ClusterApi, ClusterError, ConfigMap, DeleteOptions, Job};
use crate::meta::LabelConfig;
use crate::metrics::{JOBS_CREATED, RESOURCES_DELETED};

use super::filter::JobFilter;
use super::request::TraceRequest;
use super::spec;
use super::status::{job_hostname, job_status, TraceStatus};

/// One row of `get` output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSummary {
    pub name: String,
    pub id: String,
    pub namespace: String,
    /// Empty when the job's affinity could not be read
    pub hostname: String,
    pub start_time: Option<DateTime<Utc>>,
    pub status: TraceStatus,
}

/// What a delete removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub jobs: Vec<String>,
    pub config_maps: Vec<String>,
}

impl DeleteReport {
    /// Nothing matched the filter
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.config_maps.is_empty()
    }
}

/// Error type for trace job operations
#[derive(Debug)]
pub enum TraceError {
    /// The cluster API rejected or failed a call
    Cluster(ClusterError),
    /// Writing to the output sink failed
    Output(std::io::Error),
}

impl std::fmt::Display for TraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceError::Cluster(e) => write!(f, "{}", e),
            TraceError::Output(e) => write!(f, "Failed to write output: {}", e),
        }
    }
}

impl std::error::Error for TraceError {}

impl From<ClusterError> for TraceError {
    fn from(e: ClusterError) -> Self {
        TraceError::Cluster(e)
    }
}

impl From<std::io::Error> for TraceError {
    fn from(e: std::io::Error) -> Self {
        TraceError::Output(e)
    }
}

/// Lifecycle operations for trace jobs
pub struct TraceJobManager<C: ClusterApi> {
    api: C,
    labels: LabelConfig,
    /// Scope of get/delete; None means all namespaces
    namespace: Option<String>,
}

impl<C: ClusterApi> TraceJobManager<C> {
    /// Create a new manager
    ///
    /// # Arguments
    /// * `api` - Cluster API implementation
    /// * `labels` - Label keys used to tag and find trace objects
    /// * `namespace` - Namespace for get/delete, or None for all namespaces
    pub fn new(api: C, labels: LabelConfig, namespace: Option<String>) -> Self {
        Self {
            api,
            labels,
            namespace,
        }
    }

    pub fn labels(&self) -> &LabelConfig {
        &self.labels
    }

    pub fn api(&self) -> &C {
        &self.api
    }

    /// Submit a trace: ConfigMap first, then the Job
    pub async fn create(&self, request: &TraceRequest) -> Result<Job, TraceError> {
        let (config_map, job) = spec::build(request, &self.labels).into_parts();

        info!(
            name = %request.name,
            id = %request.id,
            namespace = %request.namespace,
            node = %request.target_hostname,
            "creating trace job"
        );

        self.api.create_config_map(&config_map).await?;

        let created = match self.api.create_job(&job).await {
            Ok(created) => created,
            Err(e) => {
                warn!(
                    name = %request.name,
                    error = %e,
                    "job creation failed, configmap left in place"
                );
                return Err(e.into());
            }
        };

        JOBS_CREATED.inc();
        Ok(created)
    }

    /// Summaries of every trace matching `filter`
    pub async fn get(&self, filter: &JobFilter) -> Result<Vec<TraceSummary>, TraceError> {
        let jobs = self.find_jobs(filter).await?;

        let summaries = jobs
            .iter()
            .map(|job| {
                let (name, id) = self.labels.identity(&job.metadata);
                let hostname = job_hostname(job).unwrap_or_else(|e| {
                    debug!(job = %job.metadata.name, error = %e, "no hostname for job");
                    String::new()
                });

                TraceSummary {
                    name,
                    id,
                    namespace: job.metadata.namespace.clone(),
                    hostname,
                    start_time: job.status.as_ref().and_then(|s| s.start_time),
                    status: job_status(job),
                }
            })
            .collect();

        Ok(summaries)
    }

    /// Delete every Job, then every ConfigMap, matching `filter`
    ///
    /// Each deletion is written to `out` as it happens. The first failure
    /// stops the delete and is returned.
    pub async fn delete<W: Write>(
        &self,
        filter: &JobFilter,
        out: &mut W,
    ) -> Result<DeleteReport, TraceError> {
        let mut report = DeleteReport::default();

        let jobs = self.find_jobs(filter).await?;
        let options = DeleteOptions::foreground_now();
        for job in &jobs {
            self.api
                .delete_job(&job.metadata.namespace, &job.metadata.name, &options)
                .await?;
            RESOURCES_DELETED.with_label_values(&["job"]).inc();
            writeln!(out, "trace job {} deleted", job.metadata.name)?;
            report.jobs.push(job.metadata.name.clone());
        }

        let config_maps = self.find_config_maps(filter).await?;
        for config_map in &config_maps {
            self.api
                .delete_config_map(&config_map.metadata.namespace, &config_map.metadata.name)
                .await?;
            RESOURCES_DELETED.with_label_values(&["configmap"]).inc();
            writeln!(out, "trace configuration {} deleted", config_map.metadata.name)?;
            report.config_maps.push(config_map.metadata.name.clone());
        }

        if report.is_empty() {
            writeln!(out, "error: no trace found to be deleted")?;
        }

        Ok(report)
    }

    async fn find_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, ClusterError> {
        let selector = filter.selector(&self.labels);
        if selector.is_empty() {
            return Ok(Vec::new());
        }
        debug!(selector = %selector, "listing trace jobs");
        self.api
            .list_jobs(self.namespace.as_deref(), &selector)
            .await
    }

    async fn find_config_maps(&self, filter: &JobFilter) -> Result<Vec<ConfigMap>, ClusterError> {
        let selector = filter.selector(&self.labels);
        if selector.is_empty() {
            return Ok(Vec::new());
        }
        debug!(selector = %selector, "listing trace configmaps");
        self.api
            .list_config_maps(self.namespace.as_deref(), &selector)
            .await
    }
}
