//! Pull-side access to job state.
//!
//! [`JobSource`] is the seam the synchronizer fetches snapshots
//! through; [`HttpJobSource`] implements it against the REST API
//! (`GET /api/{version}/jobs/{id}`) using [`reqwest`].

use async_trait::async_trait;
use datacure_core::config::ClientConfig;
use datacure_core::endpoints::EndpointResolver;
use datacure_core::job::JobSnapshot;
use datacure_core::types::JobId;

/// Errors from the pull side.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-2xx status code.
    #[error("Job API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Fetches point-in-time job snapshots.
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
    async fn fetch_job(&self, job_id: &JobId) -> Result<JobSnapshot, FetchError>;
}

/// [`JobSource`] backed by the job REST API.
pub struct HttpJobSource {
    client: reqwest::Client,
    endpoints: EndpointResolver,
}

impl HttpJobSource {
    /// Build a source with the configured request timeout.
    pub fn new(config: &ClientConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config.endpoints.clone()))
    }

    /// Create a source reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, endpoints: EndpointResolver) -> Self {
        Self { client, endpoints }
    }

    /// Ensure the response has a success status code, or turn it into
    /// a [`FetchError::Api`] carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(FetchError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn fetch_job(&self, job_id: &JobId) -> Result<JobSnapshot, FetchError> {
        let url = self.endpoints.job_detail(job_id);
        tracing::debug!(%job_id, %url, "Fetching job snapshot");

        let response = self.client.get(&url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<JobSnapshot>().await?)
    }
}
