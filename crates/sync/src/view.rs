//! The reconciled, consumer-facing projection of one job.
//!
//! A [`JobView`] starts from a pulled [`JobSnapshot`] and is then only
//! changed by folding [`ServerEvent`]s into it, in arrival order.
//!
//! Terminal events (`job_completed`, `job_failed`) are sticky: once one
//! has been folded, progress and record events are ignored, while agent
//! log lines keep being accepted.

use std::collections::VecDeque;

use datacure_core::job::{JobSnapshot, JobStatus};
use datacure_core::types::{JobId, Timestamp};
use datacure_live::messages::{LogLevel, ServerEvent};

/// Number of recently completed records kept on a view.
pub const RECENT_RECORDS_CAPACITY: usize = 50;

/// One agent log line as received from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub message: String,
    pub level: LogLevel,
    pub received_at: Timestamp,
}

/// A record that finished validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub record_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    pub job_id: JobId,
    pub name: String,
    pub filename: String,
    pub status: JobStatus,
    /// Completion percentage (0-100).
    pub progress: f64,
    pub completed_records: u64,
    pub total_records: u64,
    pub created_at: String,
    pub auto_approved_percent: Option<f64>,
    pub manual_review_percent: Option<f64>,
    pub rejected_percent: Option<f64>,
    pub eta_remaining: Option<String>,
    /// Failure reason from a `job_failed` event.
    pub error: Option<String>,
    /// Most recent completed records, oldest first.
    pub recent_records: VecDeque<RecordUpdate>,
    /// Bumped on every completed record so record listings know to
    /// re-fetch.
    pub records_revision: u64,
    /// Most recent agent log lines, oldest first.
    pub recent_logs: VecDeque<LogLine>,
    /// Number of stream events folded into this view.
    pub events_applied: u64,
    /// Set once a terminal event from the stream has been folded. A
    /// terminal status that only came from the snapshot can still be
    /// overridden by the stream.
    live_terminal: bool,
    log_capacity: usize,
}

impl JobView {
    /// Build the initial view from a pulled snapshot.
    ///
    /// `log_capacity` bounds [`recent_logs`](Self::recent_logs).
    pub fn from_snapshot(snapshot: JobSnapshot, log_capacity: usize) -> Self {
        Self {
            job_id: snapshot.id,
            name: snapshot.name,
            filename: snapshot.filename,
            status: snapshot.status,
            progress: snapshot.progress,
            completed_records: snapshot.completed_records,
            total_records: snapshot.total_records,
            created_at: snapshot.created_at,
            auto_approved_percent: snapshot.auto_approved_percent,
            manual_review_percent: snapshot.manual_review_percent,
            rejected_percent: snapshot.rejected_percent,
            eta_remaining: snapshot.eta_remaining,
            error: None,
            recent_records: VecDeque::new(),
            records_revision: 0,
            recent_logs: VecDeque::new(),
            events_applied: 0,
            live_terminal: false,
            log_capacity,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Fold one event into the view.
    ///
    /// Returns `true` if the view changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        let changed = match event {
            ServerEvent::ProgressUpdate(data) => {
                if self.is_terminal() {
                    tracing::debug!(job_id = %self.job_id, status = self.status.as_str(), "Ignoring progress after terminal event");
                    false
                } else {
                    self.progress = data.progress;
                    self.completed_records = data.completed_records;
                    if self.status == JobStatus::Queued {
                        self.status = JobStatus::Processing;
                    }
                    true
                }
            }
            ServerEvent::RecordCompleted(data) => {
                if self.is_terminal() {
                    false
                } else {
                    push_bounded(
                        &mut self.recent_records,
                        RecordUpdate {
                            record_id: data.record_id.clone(),
                            status: data.status.clone(),
                        },
                        RECENT_RECORDS_CAPACITY,
                    );
                    self.records_revision += 1;
                    true
                }
            }
            ServerEvent::AgentLog(data) => {
                push_bounded(
                    &mut self.recent_logs,
                    LogLine {
                        message: data.message.clone(),
                        level: data.level,
                        received_at: chrono::Utc::now(),
                    },
                    self.log_capacity,
                );
                true
            }
            ServerEvent::JobCompleted(data) => {
                if !self.accepts_terminal(&data.job_id) {
                    false
                } else {
                    self.status = JobStatus::Completed;
                    self.progress = 100.0;
                    self.completed_records = self.total_records;
                    self.eta_remaining = None;
                    self.error = None;
                    self.live_terminal = true;
                    true
                }
            }
            ServerEvent::JobFailed(data) => {
                if !self.accepts_terminal(&data.job_id) {
                    false
                } else {
                    self.status = JobStatus::Failed;
                    self.error = Some(data.error.clone());
                    self.eta_remaining = None;
                    self.live_terminal = true;
                    true
                }
            }
        };

        if changed {
            self.events_applied += 1;
        }
        changed
    }

    /// Merge a snapshot fetched after the job finished.
    ///
    /// The live terminal status stays authoritative; only descriptive
    /// fields, the outcome percentages and the ETA are taken from the
    /// snapshot.
    pub fn merge_refresh(&mut self, snapshot: &JobSnapshot) {
        self.name.clone_from(&snapshot.name);
        self.filename.clone_from(&snapshot.filename);
        self.total_records = snapshot.total_records;
        self.auto_approved_percent = snapshot.auto_approved_percent;
        self.manual_review_percent = snapshot.manual_review_percent;
        self.rejected_percent = snapshot.rejected_percent;
        self.eta_remaining.clone_from(&snapshot.eta_remaining);

        match self.status {
            JobStatus::Completed => self.completed_records = self.total_records,
            _ if snapshot.status.is_terminal() => {
                self.completed_records = snapshot.completed_records;
            }
            _ => {}
        }
    }

    fn accepts_terminal(&self, job_id: &JobId) -> bool {
        if *job_id != self.job_id {
            tracing::warn!(job_id = %self.job_id, event_job_id = %job_id, "Ignoring terminal event for another job");
            return false;
        }
        if self.live_terminal {
            tracing::debug!(job_id = %self.job_id, status = self.status.as_str(), "Job already terminal");
            return false;
        }
        true
    }
}

fn push_bounded<T>(items: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while items.len() >= capacity {
        items.pop_front();
    }
    items.push_back(item);
}
