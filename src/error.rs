//! Error types and handling for the Volvo connector
//!
//! This module defines the error taxonomy used throughout the connector and
//! the classification the poll loop uses to decide how a failure degrades.

use thiserror::Error;

/// Result type alias for connector operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Main error type for the connector
///
/// Errors are `Clone` so a single in-flight outcome can be handed to every
/// caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    /// Missing or invalid configuration; fatal at startup
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Token could not be obtained, refreshed or was rejected
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Token is not a structurally valid JWT
    #[error("Malformed token: {message}")]
    MalformedToken { message: String },

    /// Non-success HTTP status from the Volvo API
    #[error("API error: status {status}: {body}")]
    Api { status: u16, body: String },

    /// Transport failure or timeout
    #[error("Network error: {message}")]
    Network { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Payload could not be mapped into or was rejected by the host model
    #[error("Publish error: {message}")]
    Publish { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

/// How the poll loop treats an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Prevents startup; escapes to the host
    Fatal,
    /// Token problem; retried on the next tick
    Auth,
    /// 4xx other than 401/429; unlikely to succeed before credentials change
    Permanent,
    /// 5xx, transport failures, timeouts
    Transient,
    /// 429 from the API
    RateLimited,
    /// Mapping into the host model failed
    Publish,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Auth => "auth",
            Self::Permanent => "permanent",
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::Publish => "publish",
        }
    }
}

impl ConnectorError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        ConnectorError::Config {
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        ConnectorError::Auth {
            message: message.into(),
        }
    }

    /// Create a new malformed token error
    pub fn malformed_token<S: Into<String>>(message: S) -> Self {
        ConnectorError::MalformedToken {
            message: message.into(),
        }
    }

    /// Create a new API error from a status and response body
    pub fn api<S: Into<String>>(status: u16, body: S) -> Self {
        ConnectorError::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        ConnectorError::Network {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        ConnectorError::Serialization {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        ConnectorError::Io {
            message: message.into(),
        }
    }

    /// Create a new publish error
    pub fn publish<S: Into<String>>(message: S) -> Self {
        ConnectorError::Publish {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        ConnectorError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        ConnectorError::Generic {
            message: message.into(),
        }
    }

    /// Classify the error for the poll loop
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Config { .. } | Self::Validation { .. } => ErrorClass::Fatal,
            Self::Auth { .. } | Self::MalformedToken { .. } => ErrorClass::Auth,
            Self::Api { status, .. } => match *status {
                401 | 403 => ErrorClass::Auth,
                429 => ErrorClass::RateLimited,
                400..=499 => ErrorClass::Permanent,
                _ => ErrorClass::Transient,
            },
            Self::Network { .. } | Self::Io { .. } | Self::Generic { .. } => {
                ErrorClass::Transient
            }
            Self::Serialization { .. } | Self::Publish { .. } => ErrorClass::Publish,
        }
    }

    /// Whether the error must stop the connector from starting
    pub fn is_fatal(&self) -> bool {
        self.classify() == ErrorClass::Fatal
    }

    /// Whether the error is expected to clear up on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self.classify(),
            ErrorClass::Transient | ErrorClass::RateLimited
        )
    }

    /// HTTP status for API errors
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        ConnectorError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConnectorError {
    fn from(err: serde_yaml::Error) -> Self {
        ConnectorError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ConnectorError::network(format!("request timed out: {}", err))
        } else {
            ConnectorError::network(err.to_string())
        }
    }
}

impl From<base64::DecodeError> for ConnectorError {
    fn from(err: base64::DecodeError) -> Self {
        ConnectorError::malformed_token(format!("invalid base64 segment: {}", err))
    }
}

impl From<chrono::ParseError> for ConnectorError {
    fn from(err: chrono::ParseError) -> Self {
        ConnectorError::validation("datetime".to_string(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = ConnectorError::config("test config error");
        assert!(matches!(err, ConnectorError::Config { .. }));

        let err = ConnectorError::api(503, "unavailable");
        assert!(matches!(err, ConnectorError::Api { status: 503, .. }));

        let err = ConnectorError::validation("field", "test validation error");
        assert!(matches!(err, ConnectorError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = ConnectorError::config("test error");
        assert_eq!(format!("{}", err), "Configuration error: test error");

        let err = ConnectorError::api(404, "not found");
        assert_eq!(format!("{}", err), "API error: status 404: not found");
    }

    #[test]
    fn test_classification() {
        assert_eq!(ConnectorError::config("x").classify(), ErrorClass::Fatal);
        assert_eq!(
            ConnectorError::malformed_token("x").classify(),
            ErrorClass::Auth
        );
        assert_eq!(ConnectorError::api(401, "").classify(), ErrorClass::Auth);
        assert_eq!(
            ConnectorError::api(429, "").classify(),
            ErrorClass::RateLimited
        );
        assert_eq!(
            ConnectorError::api(404, "").classify(),
            ErrorClass::Permanent
        );
        assert_eq!(
            ConnectorError::api(502, "").classify(),
            ErrorClass::Transient
        );
        assert_eq!(
            ConnectorError::network("x").classify(),
            ErrorClass::Transient
        );
        assert!(ConnectorError::api(429, "").is_transient());
        assert!(!ConnectorError::api(400, "").is_transient());
    }
}
