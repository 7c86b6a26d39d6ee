//! Endpoint resolution for the per-job event stream and job document.
//!
//! Both addresses share the `/api/{version}` prefix. The bases are
//! validated once, when the resolver is built, so resolving an address
//! for a given job can never fail.

use crate::error::CoreError;
use crate::types::JobId;

/// Builds fully-qualified job addresses from configured bases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResolver {
    ws_base: String,
    api_base: String,
    version: String,
}

impl EndpointResolver {
    /// * `ws_base`  - WebSocket base, e.g. `ws://host:8000`.
    /// * `api_base` - HTTP base, e.g. `http://host:8000`.
    /// * `version`  - API version segment, e.g. `v1`.
    pub fn new(ws_base: &str, api_base: &str, version: &str) -> Result<Self, CoreError> {
        let ws_base = normalize_base("ws_base", ws_base, &["ws://", "wss://"])?;
        let api_base = normalize_base("api_base", api_base, &["http://", "https://"])?;

        let version = version.trim().trim_matches('/');
        if version.is_empty() || version.contains('/') {
            return Err(CoreError::config(
                "version",
                format!("expected a single path segment, got {version:?}"),
            ));
        }

        Ok(Self {
            ws_base,
            api_base,
            version: version.to_string(),
        })
    }

    /// `{wsBase}/api/{version}/ws/jobs/{jobId}`
    pub fn job_stream(&self, job_id: &JobId) -> String {
        format!("{}/api/{}/ws/jobs/{}", self.ws_base, self.version, job_id)
    }

    /// `{apiBase}/api/{version}/jobs/{jobId}`
    pub fn job_detail(&self, job_id: &JobId) -> String {
        format!("{}/api/{}/jobs/{}", self.api_base, self.version, job_id)
    }

    pub fn ws_base(&self) -> &str {
        &self.ws_base
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

fn normalize_base(
    key: &'static str,
    raw: &str,
    schemes: &[&str],
) -> Result<String, CoreError> {
    let base = raw.trim().trim_end_matches('/');
    let Some(scheme) = schemes.iter().find(|s| base.starts_with(**s)) else {
        return Err(CoreError::config(
            key,
            format!("{base:?} must start with one of {schemes:?}"),
        ));
    };
    if base.len() == scheme.len() {
        return Err(CoreError::config(key, format!("{base:?} has no host")));
    }
    Ok(base.to_string())
}
