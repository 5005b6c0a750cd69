//! Shared plumbing for outbound calls to email, image and OAuth services.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("{service} did not respond within {timeout_secs}s")]
    Timeout { service: &'static str, timeout_secs: u64 },
    #[error("{service} request failed: {message}")]
    Request { service: &'static str, message: String },
    #[error("{service} rejected the request ({status}): {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },
    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },
}

impl UpstreamError {
    /// Whether repeating the same request may succeed.
    pub fn retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout { .. } | UpstreamError::Request { .. } => true,
            UpstreamError::Rejected { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::NotConfigured { .. } => false,
        }
    }

    /// The request URL is dropped from the message; some providers take
    /// credentials in the query string.
    pub fn from_reqwest(service: &'static str, timeout: Duration, err: reqwest::Error) -> UpstreamError {
        let err = err.without_url();
        if err.is_timeout() {
            UpstreamError::Timeout {
                service,
                timeout_secs: timeout.as_secs(),
            }
        } else {
            UpstreamError::Request {
                service,
                message: err.to_string(),
            }
        }
    }
}

/// HTTP client whose every request is bounded by `timeout`.
pub fn client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("authors/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Turns a non-success response into `UpstreamError::Rejected`, keeping the
/// collaborator's message.
pub async fn check(service: &'static str, response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown error").to_string());
    Err(UpstreamError::Rejected {
        service,
        status: status.as_u16(),
        message,
    })
}
