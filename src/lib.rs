//! ktrace - run bpftrace programs on Kubernetes nodes
//!
//! This library turns a trace request into a privileged, node-pinned Job
//! plus a ConfigMap holding the program, and finds, summarizes and deletes
//! those pairs afterwards by label.
//!
//! # Modules
//!
//! - `job` - trace job construction and lifecycle (create, get, delete)
//! - `k8s` - Kubernetes resource payloads and API client
//! - `meta` - label keys and object naming
//! - `metrics` - Prometheus metrics for observability
//! - `logging` - log subscriber setup for the CLI
//!
//! # Quick Start
//!
//! ```ignore
//! use ktrace::{ClusterConfig, KubeClient, LabelConfig, TraceJobManager};
//! use ktrace::job::{JobFilter, TraceDefaults, TraceRequest};
//!
//! let config = ClusterConfig::from_env()?;
//! let manager = TraceJobManager::new(KubeClient::new(&config)?, LabelConfig::default(), None);
//!
//! let request = TraceRequest::new(id, "default", "node-1", program, manager.labels(), &TraceDefaults::default());
//! manager.create(&request).await?;
//! let traces = manager.get(&JobFilter::by_id(id)).await?;
//! ```

pub mod job;
pub mod k8s;
pub mod logging;
pub mod meta;
pub mod metrics;

// Re-export commonly used types at crate root for convenience
pub use job::{JobFilter, TraceJobManager, TraceRequest, TraceStatus, TraceSummary};
pub use k8s::{ClusterApi, ClusterConfig, ClusterError, KubeClient};
pub use meta::LabelConfig;
