//! Trace status and placement read back from a Job

use serde::Serialize;

use crate::k8s::Job;

use super::spec::HOSTNAME_LABEL;

/// Running status of a trace job at the current time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TraceStatus {
    /// The job has active pods
    Running,
    /// No active pods, at least one succeeded
    Completed,
    /// No active or succeeded pods, at least one failed
    Failed,
    /// Counters give no information (e.g. not yet scheduled)
    Unknown,
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TraceStatus::Running => "Running",
            TraceStatus::Completed => "Completed",
            TraceStatus::Failed => "Failed",
            TraceStatus::Unknown => "Unknown",
        };
        f.pad(s)
    }
}

/// Classify pod counters; active pods take precedence over history
pub fn classify(active: i32, succeeded: i32, failed: i32) -> TraceStatus {
    if active > 0 {
        TraceStatus::Running
    } else if succeeded > 0 {
        TraceStatus::Completed
    } else if failed > 0 {
        TraceStatus::Failed
    } else {
        TraceStatus::Unknown
    }
}

pub fn job_status(job: &Job) -> TraceStatus {
    match &job.status {
        Some(s) => classify(s.active, s.succeeded, s.failed),
        None => TraceStatus::Unknown,
    }
}

/// Why a job's node could not be read from its affinity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementError {
    MissingAffinity,
    MissingNodeAffinity,
    MissingRequiredScheduling,
    EmptySelectorTerms,
    EmptyMatchExpressions,
    EmptyHostnameValues,
    HostnameNotFound,
}

impl std::fmt::Display for PlacementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementError::MissingAffinity => write!(f, "affinity not found for job"),
            PlacementError::MissingNodeAffinity => write!(f, "node affinity not found for job"),
            PlacementError::MissingRequiredScheduling => write!(
                f,
                "node affinity requiredDuringSchedulingIgnoredDuringExecution not found for job"
            ),
            PlacementError::EmptySelectorTerms => {
                write!(f, "node selector terms are empty in node affinity for job")
            }
            PlacementError::EmptyMatchExpressions => write!(
                f,
                "node selector terms match expressions are empty in node affinity for job"
            ),
            PlacementError::EmptyHostnameValues => {
                write!(f, "hostname affinity found but no values in it for job")
            }
            PlacementError::HostnameNotFound => write!(f, "hostname not found for job"),
        }
    }
}

impl std::error::Error for PlacementError {}

/// Node a job is pinned to, taken from its first node selector term
pub fn job_hostname(job: &Job) -> Result<String, PlacementError> {
    let affinity = job
        .spec
        .template
        .spec
        .affinity
        .as_ref()
        .ok_or(PlacementError::MissingAffinity)?;
    let node_affinity = affinity
        .node_affinity
        .as_ref()
        .ok_or(PlacementError::MissingNodeAffinity)?;
    let required = node_affinity
        .required_during_scheduling_ignored_during_execution
        .as_ref()
        .ok_or(PlacementError::MissingRequiredScheduling)?;
    let term = required
        .node_selector_terms
        .first()
        .ok_or(PlacementError::EmptySelectorTerms)?;

    if term.match_expressions.is_empty() {
        return Err(PlacementError::EmptyMatchExpressions);
    }

    let expression = term
        .match_expressions
        .iter()
        .find(|e| e.key == HOSTNAME_LABEL)
        .ok_or(PlacementError::HostnameNotFound)?;

    expression
        .values
        .first()
        .cloned()
        .ok_or(PlacementError::EmptyHostnameValues)
}
