//! Pull-side job document returned by `GET /api/{version}/jobs/{id}`.

use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// Lifecycle status of a validation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `true` once no further progress changes are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Point-in-time state of a job as reported by the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub filename: String,
    pub status: JobStatus,
    /// Completion percentage (0-100).
    pub progress: f64,
    pub completed_records: u64,
    pub total_records: u64,
    /// Creation time as sent by the server (not always zone-qualified).
    pub created_at: String,
    #[serde(default)]
    pub auto_approved_percent: Option<f64>,
    #[serde(default)]
    pub manual_review_percent: Option<f64>,
    #[serde(default)]
    pub rejected_percent: Option<f64>,
    #[serde(default)]
    pub eta_remaining: Option<String>,
}
