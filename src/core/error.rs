//! # Error Handling Module
//!
//! This module provides error handling for the gateway using the `thiserror` crate.
//! It defines every failure the request path can hit and maps each one to the
//! HTTP status and JSON body returned to clients.
//!
//! ## Rust Error Handling Concepts
//!
//! - `Result<T, E>` instead of exceptions: `Ok(value)` or `Err(error)`
//! - The `?` operator propagates errors up the call stack
//! - Enum variants represent the different error conditions, and `match`
//!   forces every caller that inspects them to handle all of them
//! - `thiserror` derives `Display` and `Error` from the `#[error("...")]` attributes
//!
//! ## Response Shape
//!
//! Every error is rendered as:
//!
//! ```json
//! { "error": "Service Unavailable", "message": "...", "code": 503 }
//! ```
//!
//! where `error` is the canonical reason phrase of the status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error types for the gateway request path
///
/// Each variant is handled at the point of detection and converted into the
/// structured error body; none of them reach the HTTP runtime's default error page.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// No configured route prefix matches the request path
    #[error("No route matches path {path}")]
    RouteNotFound { path: String },

    /// Discovery returned zero healthy instances for the service
    #[error("Service {service} unavailable: {reason}")]
    ServiceUnavailable { service: String, reason: String },

    /// The registry could not be reached or returned an unusable answer
    #[error("Service {service} unavailable: registry lookup failed: {reason}")]
    RegistryUnavailable { service: String, reason: String },

    /// The resolved address could not be turned into an outbound target
    #[error("Failed to create proxy for {target}: {reason}")]
    ProxyConstruction { target: String, reason: String },

    /// Transport-level failure talking to the backend
    #[error("Upstream service error ({target}): {message}")]
    Upstream { target: String, message: String },

    /// The inbound request could not be read (body too large, client aborted)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Sliding-window capacity exceeded for the client
    #[error("Rate limit exceeded: {limit} requests per {window}")]
    RateLimited { limit: usize, window: String },

    /// Incremental responses could not be produced
    #[error("Streaming not supported: {reason}")]
    StreamingUnsupported { reason: String },

    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a route-not-found error for the given path
    pub fn route_not_found<S: Into<String>>(path: S) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a registry failure error
    pub fn registry_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::RegistryUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a proxy construction error
    pub fn proxy_construction<S: Into<String>, R: Into<String>>(target: S, reason: R) -> Self {
        Self::ProxyConstruction {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream transport error
    pub fn upstream<S: Into<String>, M: Into<String>>(target: S, message: M) -> Self {
        Self::Upstream {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            // Registry outages and empty instance lists look the same to clients;
            // the variant stays distinct for logs and metrics.
            Self::RegistryUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProxyConstruction { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::StreamingUnsupported { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for logs and metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::RegistryUnavailable { .. } => "registry_unavailable",
            Self::ProxyConstruction { .. } => "proxy_construction_failed",
            Self::Upstream { .. } => "upstream_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::StreamingUnsupported { .. } => "streaming_unsupported",
            Self::Configuration { .. } => "configuration_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }

    /// Build the JSON body sent to clients for this error
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody::new(self.status_code(), self.to_string())
    }
}

/// Structured error body shared by every error response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Canonical reason phrase of the status code
    pub error: String,
    /// Human-readable detail
    pub message: String,
    /// Numeric HTTP status code
    pub code: u16,
}

impl ErrorBody {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: message.into(),
            code: status.as_u16(),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Lets handlers return `GatewayError` directly; Axum renders it with the
/// mapped status code and the structured body.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self.to_body())).into_response()
    }
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("Invalid port: {}", port)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::GatewayError::config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::route_not_found("/anything").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::service_unavailable("order-service", "no instances").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::registry_unavailable("order-service", "connection refused").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::proxy_construction("http://[bad", "invalid host").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::upstream("http://10.0.0.1:9000", "connection reset").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::RateLimited {
                limit: 100,
                window: "60s".to_string()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::StreamingUnsupported {
                reason: "no flush".to_string()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_registry_and_empty_service_are_distinct_kinds() {
        let empty = GatewayError::service_unavailable("auth-service", "no instances");
        let registry = GatewayError::registry_unavailable("auth-service", "timeout");

        assert_eq!(empty.status_code(), registry.status_code());
        assert_ne!(empty.error_type(), registry.error_type());
    }

    #[test]
    fn test_error_body_shape() {
        let body = GatewayError::route_not_found("/anything").to_body();

        assert_eq!(body.code, 404);
        assert_eq!(body.error, "Not Found");
        assert!(body.message.contains("/anything"));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], 404);
        assert_eq!(json["error"], "Not Found");
    }

    #[tokio::test]
    async fn test_into_response_uses_mapped_status() {
        let response = GatewayError::upstream("http://backend", "refused").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.code, 502);
        assert_eq!(body.error, "Bad Gateway");
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("Invalid port: {}", 0);
        assert!(matches!(err, GatewayError::Configuration { .. }));
        assert!(err.to_string().contains("Invalid port: 0"));
    }
}
