use thiserror::Error;

/// Failures surfaced by backend calls and session operations.
///
/// Parse-level problems inside a stream (malformed event JSON, malformed
/// embedded payloads) are recovered locally and never appear here; only
/// transport and authorization failures propagate to callers.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("authorization failed and token refresh did not recover")]
    Unauthorized,
    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}
