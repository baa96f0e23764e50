//! Trace job lifecycle module
//!
//! This module turns trace requests into cluster objects and manages them
//! afterwards:
//! - `request` - the parameters of one trace
//! - `spec` - builds the ConfigMap/Job pair (pure, no I/O)
//! - `filter` - label selectors by name or id
//! - `status` - status classification and node extraction
//! - `manager` - create / get / delete against a `ClusterApi`
//! - `target` - node and pod target resolution

pub mod filter;
pub mod manager;
pub mod request;
pub mod spec;
pub mod status;
pub mod target;

pub use filter::JobFilter;
pub use manager::{DeleteReport, TraceError, TraceJobManager, TraceSummary};
pub use request::{PodTarget, TraceDefaults, TraceRequest};
pub use spec::{build, HeaderMounts, TraceBundle};
pub use status::{classify, job_hostname, PlacementError, TraceStatus};
pub use target::{Placement, Target, TargetError};
