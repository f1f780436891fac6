//! Error types for the relay.
//!
//! Every failure that reaches the HTTP surface is one of six Anthropic error
//! kinds; [`ProxyError::kind`] and [`ProxyError::status`] carry the mapping.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("{message}")]
    Authentication { message: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("{message}")]
    RateLimited { message: String },

    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Upstream call timed out or was aborted")]
    Timeout,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Internal(String),
}

/// The Anthropic-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    InvalidRequest,
    RateLimit,
    Api,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Api => "api_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl ProxyError {
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited {
            message: msg.into(),
        }
    }

    pub fn upstream(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Upstream { .. } => ErrorKind::Api,
            Self::Timeout => ErrorKind::Timeout,
            Self::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            _ => ErrorKind::Internal,
        }
    }

    /// HTTP status the caller sees for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Upstream { status, .. } => *status,
            _ => match self.kind() {
                ErrorKind::Authentication => 401,
                ErrorKind::InvalidRequest => 400,
                ErrorKind::RateLimit => 429,
                ErrorKind::Api => 502,
                ErrorKind::Timeout => 504,
                ErrorKind::Internal => 500,
            },
        }
    }

    /// Message placed in the Anthropic error envelope.
    pub fn message(&self) -> String {
        match self {
            Self::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_status() {
        let cases = [
            (ProxyError::authentication("x"), "authentication_error", 401),
            (ProxyError::invalid_request("x"), "invalid_request_error", 400),
            (ProxyError::rate_limited("x"), "rate_limit_error", 429),
            (ProxyError::upstream(503, "x"), "api_error", 503),
            (ProxyError::Timeout, "timeout_error", 504),
            (ProxyError::internal("x"), "internal_error", 500),
            (ProxyError::config("x"), "internal_error", 500),
        ];
        for (err, kind, status) in cases {
            assert_eq!(err.kind().as_str(), kind);
            assert_eq!(err.status(), status);
        }
    }

    #[test]
    fn test_upstream_message_is_raw() {
        let err = ProxyError::upstream(400, "bad model");
        assert_eq!(err.message(), "bad model");
    }
}
