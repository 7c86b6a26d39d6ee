use std::str::FromStr;
use std::time::Duration;

use crate::endpoints::EndpointResolver;
use crate::error::CoreError;

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local development backend.
/// Malformed values are reported once, at startup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Resolves stream and job-detail addresses.
    pub endpoints: EndpointResolver,
    /// Maximum consecutive reconnect attempts before giving up.
    pub reconnect_max_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_base_delay: Duration,
    /// Upper bound on any single reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Timeout applied to each pull request.
    pub request_timeout: Duration,
    /// Number of recent agent log lines retained on a job view.
    pub log_capacity: usize,
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `DATACURE_WS_URL`         | `ws://localhost:8000`   |
    /// | `DATACURE_API_URL`        | `http://localhost:8000` |
    /// | `DATACURE_API_VERSION`    | `v1`                    |
    /// | `RECONNECT_MAX_ATTEMPTS`  | `5`                     |
    /// | `RECONNECT_BASE_DELAY_MS` | `1000`                  |
    /// | `RECONNECT_MAX_DELAY_MS`  | `30000`                 |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `JOB_VIEW_LOG_CAPACITY`   | `100`                   |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ws_url = lookup("DATACURE_WS_URL").unwrap_or_else(|| "ws://localhost:8000".into());
        let api_url = lookup("DATACURE_API_URL").unwrap_or_else(|| "http://localhost:8000".into());
        let version = lookup("DATACURE_API_VERSION").unwrap_or_else(|| "v1".into());
        let endpoints = EndpointResolver::new(&ws_url, &api_url, &version)?;

        let reconnect_max_attempts: u32 = parse_or(&lookup, "RECONNECT_MAX_ATTEMPTS", 5)?;
        let base_ms: u64 = parse_or(&lookup, "RECONNECT_BASE_DELAY_MS", 1000)?;
        let max_ms: u64 = parse_or(&lookup, "RECONNECT_MAX_DELAY_MS", 30_000)?;
        if base_ms == 0 || max_ms < base_ms {
            return Err(CoreError::config(
                "RECONNECT_MAX_DELAY_MS",
                format!("base delay {base_ms}ms must be non-zero and at most max delay {max_ms}ms"),
            ));
        }

        let timeout_secs: u64 = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 30)?;
        let log_capacity: usize = parse_or(&lookup, "JOB_VIEW_LOG_CAPACITY", 100)?;

        Ok(Self {
            endpoints,
            reconnect_max_attempts,
            reconnect_base_delay: Duration::from_millis(base_ms),
            reconnect_max_delay: Duration::from_millis(max_ms),
            request_timeout: Duration::from_secs(timeout_secs),
            log_capacity,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CoreError::config(key, format!("{raw:?}: {e}"))),
    }
}
