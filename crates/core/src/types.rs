use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque identifier of a validation job.
///
/// The only correlation key between the pulled job document and the
/// pushed event stream. Because it is spliced into request paths, ids
/// are checked with [`JobId::parse`] before use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Validate and wrap a raw job id.
    ///
    /// Rejects blank ids and ids containing URL path or query delimiters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(CoreError::Validation("job id must not be empty".into()));
        }
        if let Some(c) = raw.chars().find(|c| matches!(c, '/' | '?' | '#')) {
            return Err(CoreError::Validation(format!(
                "job id {raw:?} contains reserved character {c:?}"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
