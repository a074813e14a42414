//! Error types for traefik-tower
//!
//! Two layers live here:
//!
//! - [`AuthError`] is the verification outcome taxonomy. Every strategy
//!   failure is either caller-attributable (`Unauthorized`) or
//!   system-attributable (`Internal`). The HTTP boundary is the only place
//!   that maps the two kinds to status codes.
//! - [`TowerError`] covers everything around verification: configuration,
//!   bootstrap and telemetry setup.

use http::StatusCode;
use thiserror::Error;

/// Verification failure returned by the strategy engine
///
/// Constructed at the point of failure and propagated unchanged to the
/// boundary handler. The message is for logs only and is never sent back
/// to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing or malformed credential, inactive token, denied policy,
    /// empty identity field, unconfigured policy engine
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network failure, malformed remote payload, missing downstream client
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Build an `Unauthorized` error from anything printable
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized(reason.into())
    }

    /// Build an `Internal` error from anything printable
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// HTTP status the boundary answers with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller is to blame for this failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Internal(format!("HTTP transport failure: {}", err))
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("Malformed remote payload: {}", err))
    }
}

/// Result type for verification steps
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Service-level error type
///
/// Raised while loading configuration, building clients or wiring the
/// server. Verification itself never produces these.
#[derive(Error, Debug)]
pub enum TowerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telemetry setup errors (log subscriber, tracer provider)
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for traefik-tower operations
///
/// Uses `anyhow::Error` so bootstrap code can attach context while
/// propagating.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_display() {
        let error = AuthError::unauthorized("token inactive");
        assert_eq!(error.to_string(), "Unauthorized: token inactive");
    }

    #[test]
    fn test_internal_display() {
        let error = AuthError::internal("connection refused");
        assert_eq!(error.to_string(), "Internal error: connection refused");
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            AuthError::unauthorized("x").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::internal("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(AuthError::unauthorized("x").kind(), "unauthorized");
        assert_eq!(AuthError::internal("x").kind(), "internal");
        assert!(AuthError::unauthorized("x").is_unauthorized());
        assert!(!AuthError::internal("x").is_unauthorized());
    }

    #[test]
    fn test_json_error_maps_to_internal() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let error: AuthError = json_error.into();
        assert!(matches!(error, AuthError::Internal(_)));
    }

    #[test]
    fn test_config_error_display() {
        let error = TowerError::Config("missing AUTH_SERVER_URL".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: missing AUTH_SERVER_URL"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: TowerError = io_error.into();
        assert!(matches!(error, TowerError::Io(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: TowerError = yaml_error.into();
        assert!(matches!(error, TowerError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthError>();
        assert_send_sync::<TowerError>();
    }
}
