use thiserror::Error;

/// Errors produced by the chat client and its providers.
///
/// Only `InvalidArgument` is ever returned to callers of the facade; every
/// other variant is folded into a [`crate::ChatResult`] or a terminal
/// [`crate::StreamFragment`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Error object reported by the endpoint inside an otherwise successful
    /// response or stream event.
    #[error("API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ClientError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Whether another attempt may be issued after this error.
    ///
    /// Transport failures are not classified further: a timeout, a 4xx and a
    /// 5xx all retry the same way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Api { .. } | Self::Network(_) | Self::Decode(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
