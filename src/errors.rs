//! Typed failures that callers are expected to match on.
//!
//! Everything else travels as `anyhow::Error` and ends up in the event
//! handler's catch-all.

use serenity::http::HttpError;

/// Failure talking to the AI provider. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("AI provider error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Failure reported by the chat platform for an outbound operation.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform refused the operation, e.g. the target has DMs disabled.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl PlatformError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, PlatformError::Forbidden(_))
    }
}

impl From<serenity::Error> for PlatformError {
    fn from(err: serenity::Error) -> Self {
        match &err {
            serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) => {
                let message = resp.error.message.clone();
                match resp.status_code.as_u16() {
                    403 => PlatformError::Forbidden(message),
                    404 => PlatformError::NotFound(message),
                    status => PlatformError::Other(format!("HTTP {}: {}", status, message)),
                }
            }
            _ => PlatformError::Other(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_forbidden_is_forbidden() {
        assert!(PlatformError::Forbidden("Cannot send messages to this user".into()).is_forbidden());
        assert!(!PlatformError::NotFound("Unknown User".into()).is_forbidden());
        assert!(!PlatformError::Other("boom".into()).is_forbidden());
    }

    #[test]
    fn test_non_http_serenity_error_is_other() {
        let err: PlatformError = serenity::Error::Other("gateway closed").into();
        assert!(matches!(err, PlatformError::Other(msg) if msg.contains("gateway closed")));
    }

    #[test]
    fn test_api_error_display() {
        let err = RelayError::Api {
            status: 502,
            body: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "AI provider error (502): bad gateway");
    }
}
