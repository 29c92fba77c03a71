#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Connection, DNS, TLS or timeout failure. Never retried.
    #[error("upstream transport error: {0}")]
    Transport(#[from] wreq::Error),
    #[error("upstream returned {status}: {message}")]
    Api {
        status: u16,
        message: String,
        code: String,
        kind: String,
    },
    #[error("upstream returned status {status}")]
    Status { status: u16 },
    #[error("failed to decode upstream response: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode upstream request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("session token has no exp field")]
    InvalidSessionToken,
}

impl UpstreamError {
    /// HTTP status reported by upstream, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Api { status, .. } | UpstreamError::Status { status } => Some(*status),
            _ => None,
        }
    }
}
