//! Domain errors for the tunnel protocol.
//!
//! # Responsibilities
//! - Represent every error kind the envelope protocol can surface
//! - Carry the HTTP status and the JSON wire body `{code, id, message?, stack?}`
//! - Map outbound transport failures onto protocol error codes
//!
//! # Design Decisions
//! - One flat error type; handlers return `Result<Response, BareError>` and
//!   the server core renders the error uniformly
//! - Unexpected failures collapse into `UNKNOWN` rather than leaking internals

use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Wire representation of an error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Errors surfaced to tunnel clients.
#[derive(Debug, Clone, Error)]
pub enum BareError {
    /// A required envelope header was absent.
    #[error("missing required header {0}")]
    MissingHeader(String),

    /// An envelope header was present but malformed.
    #[error("invalid header {header}: {reason}")]
    InvalidHeader { header: String, reason: String },

    /// A forbidden name appeared in a pass or forward list.
    #[error("forbidden header {0}")]
    ForbiddenHeader(String),

    /// DNS resolution failed for the remote host.
    #[error("remote host not found")]
    HostNotFound,

    /// The remote refused the connection.
    #[error("remote refused the connection")]
    ConnectionRefused,

    /// The remote reset the connection.
    #[error("remote reset the connection")]
    ConnectionReset,

    /// The outbound request timed out.
    #[error("remote connection timed out")]
    ConnectionTimeout,

    /// Per-IP rate limit exhausted.
    #[error("too many connections")]
    TooManyConnections,

    /// No route under the mount prefix.
    #[error("not found")]
    NotFound,

    /// Anything else. `name` feeds the wire id (`error.<name>`).
    #[error("{message}")]
    Unknown {
        name: String,
        message: String,
        stack: Option<String>,
    },
}

impl BareError {
    pub fn missing_header(name: &str) -> Self {
        Self::MissingHeader(name.to_string())
    }

    pub fn invalid_header(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            header: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn forbidden_header(name: &str) -> Self {
        Self::ForbiddenHeader(name.to_string())
    }

    /// Wrap an arbitrary failure the way an uncaught exception would surface.
    pub fn unknown(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unknown {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader(_) | Self::InvalidHeader { .. } | Self::ForbiddenHeader(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::HostNotFound
            | Self::ConnectionRefused
            | Self::ConnectionReset
            | Self::ConnectionTimeout
            | Self::Unknown { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TooManyConnections => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingHeader(_) => "MISSING_BARE_HEADER",
            Self::InvalidHeader { .. } => "INVALID_BARE_HEADER",
            Self::ForbiddenHeader(_) => "FORBIDDEN_BARE_HEADER",
            Self::HostNotFound => "HOST_NOT_FOUND",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::ConnectionReset => "CONNECTION_RESET",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::TooManyConnections => "CONNECTION_LIMIT_EXCEEDED",
            Self::NotFound | Self::Unknown { .. } => "UNKNOWN",
        }
    }

    /// Wire identifier locating the error source.
    pub fn id(&self) -> String {
        match self {
            Self::MissingHeader(name)
            | Self::InvalidHeader { header: name, .. }
            | Self::ForbiddenHeader(name) => format!("request.headers.{name}"),
            Self::HostNotFound
            | Self::ConnectionRefused
            | Self::ConnectionReset
            | Self::ConnectionTimeout => "request".to_string(),
            Self::TooManyConnections => "error.TooManyConnections".to_string(),
            Self::NotFound => "error.NotFoundError".to_string(),
            Self::Unknown { name, .. } => format!("error.{name}"),
        }
    }

    /// Render the JSON wire body. `include_stack` follows the server's
    /// `log_errors` setting.
    pub fn body(&self, include_stack: bool) -> ErrorBody {
        let message = match self {
            Self::MissingHeader(_) => None,
            Self::InvalidHeader { reason, .. } => Some(reason.clone()),
            Self::ForbiddenHeader(_) => None,
            Self::TooManyConnections => Some("Too many connections are open.".to_string()),
            Self::NotFound => Some("Not found.".to_string()),
            Self::Unknown { message, .. } => Some(message.clone()),
            other => Some(other.to_string()),
        };
        let stack = match self {
            Self::Unknown { stack, .. } if include_stack => stack.clone(),
            _ => None,
        };
        ErrorBody {
            code: self.code(),
            id: self.id(),
            message,
            stack,
        }
    }

    /// Build the HTTP response for this error. CORS headers are appended by
    /// the outermost middleware, not here.
    pub fn into_response(self, include_stack: bool) -> Response<Body> {
        let body = serde_json::to_string(&self.body(include_stack))
            .unwrap_or_else(|_| r#"{"code":"UNKNOWN","id":"error.Serialize"}"#.to_string());
        Response::builder()
            .status(self.status())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| {
                Response::new(Body::from(r#"{"code":"UNKNOWN","id":"error.Response"}"#))
            })
    }

    /// Map an outbound transport failure onto a protocol error by walking the
    /// error source chain for the underlying I/O error.
    pub fn from_transport(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(io) = e.downcast_ref::<std::io::Error>() {
                return Self::from_io(io);
            }
            current = e.source();
        }
        Self::unknown("Error", err.to_string())
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::ConnectionReset
            }
            ErrorKind::TimedOut => Self::ConnectionTimeout,
            ErrorKind::PermissionDenied if err.to_string().contains("Forbidden IP") => {
                Self::unknown("Error", "Forbidden IP")
            }
            ErrorKind::NotFound => Self::HostNotFound,
            // getaddrinfo failures come through as uncategorized I/O errors
            _ if err.to_string().contains("lookup") || err.to_string().contains("resolve") => {
                Self::HostNotFound
            }
            _ => Self::unknown("Error", err.to_string()),
        }
    }
}

impl From<serde_json::Error> for BareError {
    fn from(err: serde_json::Error) -> Self {
        Self::unknown("SyntaxError", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_header_wire_shape() {
        let err = BareError::missing_header("x-bare-host");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let body = err.body(false);
        assert_eq!(body.code, "MISSING_BARE_HEADER");
        assert_eq!(body.id, "request.headers.x-bare-host");
    }

    #[test]
    fn test_unknown_hides_stack_unless_enabled() {
        let err = BareError::Unknown {
            name: "Error".into(),
            message: "boom".into(),
            stack: Some("trace".into()),
        };
        assert!(err.body(false).stack.is_none());
        assert_eq!(err.body(true).stack.as_deref(), Some("trace"));
        assert_eq!(err.body(true).id, "error.Error");
    }

    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert!(matches!(
            BareError::from_io(&refused),
            BareError::ConnectionRefused
        ));

        let forbidden = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Forbidden IP");
        match BareError::from_io(&forbidden) {
            BareError::Unknown { message, .. } => assert_eq!(message, "Forbidden IP"),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_wire_shape() {
        let body = BareError::TooManyConnections.body(false);
        assert_eq!(body.code, "CONNECTION_LIMIT_EXCEEDED");
        assert_eq!(body.id, "error.TooManyConnections");
    }
}
