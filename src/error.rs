//! # Error Types
//!
//! Custom error types for SAR Relay using `thiserror`.
//!
//! Startup errors (`Config`, `InvalidConnectKey`, `InvalidSerial`, `HttpClient`)
//! abort the process. Everything the relay loop can hit at runtime is recovered
//! through backoff and only counted.

use thiserror::Error;

/// Main error type for SAR Relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Upstream network failure, timeout, server error or unusable response
    #[error("Telemetry source unavailable: {0}")]
    SourceUnavailable(String),

    /// Upstream rejected the API token
    #[error("Telemetry source rejected credentials: {0}")]
    SourceAuthError(String),

    /// Vehicle is connected but has not produced a position yet
    #[error("Vehicle has no position fix yet")]
    SourceNoFix,

    /// Downstream network failure, timeout or server error
    #[error("Tracker sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Downstream refused the report (client error)
    #[error("Tracker sink rejected report: HTTP {status}: {body}")]
    SinkRejected { status: u16, body: String },

    /// Connect key contains a hyphen or is empty
    #[error("Invalid connect key '{0}': must be non-empty and contain no '-'")]
    InvalidConnectKey(String),

    /// Vehicle serial too short to derive a device id
    #[error("Invalid vehicle serial '{0}': need at least 4 characters")]
    InvalidSerial(String),

    /// Coordinates outside [-90, 90] / [-180, 180]
    #[error("Invalid position fix: lat={latitude}, lon={longitude}")]
    InvalidFix { latitude: f64, longitude: f64 },

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether this outcome ends a cycle quietly instead of counting as a failure.
    pub fn is_quiet(&self) -> bool {
        matches!(self, RelayError::SourceNoFix)
    }

    /// Classify a runtime failure for the status reporter.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RelayError::SourceAuthError(_) => FailureKind::Auth,
            RelayError::SourceUnavailable(_) | RelayError::SourceNoFix => FailureKind::Source,
            RelayError::InvalidFix { .. } => FailureKind::InvalidFix,
            RelayError::SinkUnavailable(_) => FailureKind::Sink,
            RelayError::SinkRejected { .. } => FailureKind::SinkRejected,
            _ => FailureKind::Other,
        }
    }
}

/// Coarse failure category surfaced to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Source,
    Auth,
    InvalidFix,
    Sink,
    SinkRejected,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureKind::Source => "source unavailable",
            FailureKind::Auth => "source auth rejected",
            FailureKind::InvalidFix => "invalid fix",
            FailureKind::Sink => "sink unavailable",
            FailureKind::SinkRejected => "sink rejected",
            FailureKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// Result type alias for SAR Relay
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_fix_is_quiet() {
        assert!(RelayError::SourceNoFix.is_quiet());
        assert!(!RelayError::SourceUnavailable("timeout".into()).is_quiet());
        assert!(!RelayError::SourceAuthError("401".into()).is_quiet());
    }

    #[test]
    fn test_auth_error_surfaces_distinctly() {
        let kind = RelayError::SourceAuthError("HTTP 401".into()).failure_kind();
        assert_eq!(kind, FailureKind::Auth);
        assert_ne!(
            RelayError::SourceUnavailable("x".into()).failure_kind(),
            FailureKind::Auth
        );
    }

    #[test]
    fn test_sink_rejected_message() {
        let err = RelayError::SinkRejected {
            status: 400,
            body: "bad id".into(),
        };
        assert_eq!(err.to_string(), "Tracker sink rejected report: HTTP 400: bad id");
        assert_eq!(err.failure_kind(), FailureKind::SinkRejected);
    }
}
