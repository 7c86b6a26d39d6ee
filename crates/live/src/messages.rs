//! Job event stream message types and decoder.
//!
//! The server sends JSON text frames with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ServerEvent`] enum.

use datacure_core::types::JobId;
use serde::{Deserialize, Serialize};

/// All known job event stream message types.
///
/// Deserialized via the adjacently-tagged `"type"` field with
/// associated `"data"` content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Overall job progress moved.
    #[serde(rename = "progress_update")]
    ProgressUpdate(ProgressData),

    /// A single record finished validation.
    #[serde(rename = "record_completed")]
    RecordCompleted(RecordCompletedData),

    /// A log line emitted by one of the validation agents.
    #[serde(rename = "agent_log")]
    AgentLog(AgentLogData),

    /// The job finished successfully.
    #[serde(rename = "job_completed")]
    JobCompleted(JobCompletedData),

    /// The job failed.
    #[serde(rename = "job_failed")]
    JobFailed(JobFailedData),
}

impl ServerEvent {
    /// Wire name of the event, as carried in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::ProgressUpdate(_) => "progress_update",
            ServerEvent::RecordCompleted(_) => "record_completed",
            ServerEvent::AgentLog(_) => "agent_log",
            ServerEvent::JobCompleted(_) => "job_completed",
            ServerEvent::JobFailed(_) => "job_failed",
        }
    }

    /// `true` for events after which no further progress is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerEvent::JobCompleted(_) | ServerEvent::JobFailed(_))
    }
}

/// Payload for `progress_update` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressData {
    /// Completion percentage (0-100).
    pub progress: f64,
    pub completed_records: u64,
}

/// Payload for `record_completed` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCompletedData {
    pub record_id: String,
    pub status: String,
}

/// Severity attached to an agent log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    /// Any level this client does not know about.
    #[serde(other)]
    Other,
}

/// Payload for `agent_log` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLogData {
    pub message: String,
    pub level: LogLevel,
}

/// Payload for `job_completed` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCompletedData {
    pub job_id: JobId,
}

/// Payload for `job_failed` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailedData {
    pub job_id: JobId,
    pub error: String,
}

/// Decode a text frame into a typed event.
///
/// Returns `Err` for malformed JSON or unknown `type` values. Callers
/// should log and drop the frame.
pub fn decode_frame(text: &str) -> Result<ServerEvent, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_progress_update() {
        let json = r#"{"type":"progress_update","data":{"progress":37,"completedRecords":370}}"#;
        match decode_frame(json).unwrap() {
            ServerEvent::ProgressUpdate(data) => {
                assert_eq!(data.progress, 37.0);
                assert_eq!(data.completed_records, 370);
            }
            other => panic!("Expected ProgressUpdate, got {other:?}"),
        }
    }

    #[test]
    fn decode_record_completed() {
        let json =
            r#"{"type":"record_completed","data":{"recordId":"job-1-rec-0004","status":"completed"}}"#;
        match decode_frame(json).unwrap() {
            ServerEvent::RecordCompleted(data) => {
                assert_eq!(data.record_id, "job-1-rec-0004");
                assert_eq!(data.status, "completed");
            }
            other => panic!("Expected RecordCompleted, got {other:?}"),
        }
    }

    #[test]
    fn decode_agent_log_with_known_and_unknown_levels() {
        let json = r#"{"type":"agent_log","data":{"message":"NPI verified","level":"success"}}"#;
        match decode_frame(json).unwrap() {
            ServerEvent::AgentLog(data) => {
                assert_eq!(data.message, "NPI verified");
                assert_eq!(data.level, LogLevel::Success);
            }
            other => panic!("Expected AgentLog, got {other:?}"),
        }

        let json = r#"{"type":"agent_log","data":{"message":"x","level":"trace"}}"#;
        match decode_frame(json).unwrap() {
            ServerEvent::AgentLog(data) => assert_eq!(data.level, LogLevel::Other),
            other => panic!("Expected AgentLog, got {other:?}"),
        }
    }

    #[test]
    fn decode_terminal_events() {
        let done = decode_frame(r#"{"type":"job_completed","data":{"jobId":"job-1"}}"#).unwrap();
        assert!(done.is_terminal());
        assert_eq!(done.kind(), "job_completed");

        let json = r#"{"type":"job_failed","data":{"jobId":"job-1","error":"upstream timeout"}}"#;
        match decode_frame(json).unwrap() {
            ServerEvent::JobFailed(data) => {
                assert_eq!(data.job_id.as_str(), "job-1");
                assert_eq!(data.error, "upstream timeout");
            }
            other => panic!("Expected JobFailed, got {other:?}"),
        }
    }

    #[test]
    fn progress_is_not_terminal() {
        let event = ServerEvent::ProgressUpdate(ProgressData {
            progress: 1.0,
            completed_records: 1,
        });
        assert!(!event.is_terminal());
    }

    #[test]
    fn encoding_uses_the_wire_shape() {
        let event = ServerEvent::ProgressUpdate(ProgressData {
            progress: 50.0,
            completed_records: 5,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "progress_update");
        assert_eq!(value["data"]["completedRecords"], 5);
    }

    #[test]
    fn decode_unknown_type_returns_error() {
        assert!(decode_frame(r#"{"type":"heartbeat","data":{}}"#).is_err());
    }

    #[test]
    fn decode_missing_fields_returns_error() {
        assert!(decode_frame(r#"{"type":"progress_update","data":{"progress":5}}"#).is_err());
    }

    #[test]
    fn decode_invalid_json_returns_error() {
        assert!(decode_frame("not json at all").is_err());
    }
}
