//! # HTTP Server Module
//!
//! This module builds the inbound HTTP surface with the Axum framework:
//!
//! - `GET /ping` answers `pong`
//! - `GET /health` reports liveness as JSON
//! - every path under the mount point goes to the `GatewayDispatcher`
//! - anything else gets a 404 with the standard error body
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` for sharing the dispatcher and limiter across request tasks
//! - Tower layers for tracing, request ids, CORS and rate limiting
//! - `axum::serve` with graceful shutdown driven by a caller-supplied future

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router as AxumRouter};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::config::ServerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::dispatcher::GatewayDispatcher;
use crate::middleware::rate_limiting::{rate_limit, SlidingWindowLimiter};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub dispatcher: Arc<GatewayDispatcher>,
    /// Normalized mount point; empty means every path is dispatched
    pub mount_point: Arc<str>,
}

/// Strip a trailing `/` so `/api/` and `/api` mount the same way
fn normalize_mount_point(mount_point: &str) -> String {
    mount_point.trim_end_matches('/').to_string()
}

/// Whether a request path falls under the mount point
pub fn is_mounted(mount_point: &str, path: &str) -> bool {
    if mount_point.is_empty() {
        return true;
    }
    match path.strip_prefix(mount_point) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// The gateway HTTP server
pub struct GatewayServer {
    app: AxumRouter,
    bind_addr: String,
}

impl GatewayServer {
    /// Build the server; `limiter` is `None` when rate limiting is disabled
    pub fn new(
        config: &ServerConfig,
        dispatcher: Arc<GatewayDispatcher>,
        limiter: Option<Arc<SlidingWindowLimiter>>,
    ) -> Self {
        Self {
            app: build_router(config, dispatcher, limiter),
            bind_addr: format!("{}:{}", config.bind_address, config.port),
        }
    }

    /// The fully layered router (used directly by tests)
    pub fn app(&self) -> AxumRouter {
        self.app.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            GatewayError::config(format!("Failed to bind gateway server to {}: {}", self.bind_addr, e))
        })?;

        info!("Gateway HTTP server listening on {}", self.bind_addr);
        Self::serve_on(listener, self.app, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on<F>(listener: TcpListener, app: AxumRouter, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(GatewayError::from)
    }
}

/// Assemble routes and middleware layers
pub fn build_router(
    config: &ServerConfig,
    dispatcher: Arc<GatewayDispatcher>,
    limiter: Option<Arc<SlidingWindowLimiter>>,
) -> AxumRouter {
    let state = ServerState {
        dispatcher,
        mount_point: Arc::from(normalize_mount_point(&config.mount_point)),
    };

    let mut app = AxumRouter::new()
        .route("/ping", get(ping))
        .route("/health", get(health_check))
        .fallback(dispatch)
        .with_state(state);

    if let Some(limiter) = limiter {
        info!(
            requests = limiter.capacity(),
            window = ?limiter.window(),
            "Rate limiting enabled"
        );
        app = app.layer(axum::middleware::from_fn_with_state(limiter, rate_limit));
    }

    app = app.layer(cors_layer(&config.cors_origins));

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    layer.allow_origin(allowed)
}

async fn dispatch(State(state): State<ServerState>, request: Request) -> Response {
    if !is_mounted(&state.mount_point, request.uri().path()) {
        return GatewayError::route_not_found(request.uri().path()).into_response();
    }
    state.dispatcher.handle(request).await
}

/// Liveness probe
pub async fn ping() -> &'static str {
    "pong"
}

/// Health check handler
pub async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    let health_info = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "gateway",
        "routes": state.dispatcher.routes().len(),
        "discovery": state.dispatcher.discovery().discovery_type(),
    });

    (StatusCode::OK, Json(health_info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mounted() {
        assert!(is_mounted("/api", "/api"));
        assert!(is_mounted("/api", "/api/auth/login"));
        assert!(!is_mounted("/api", "/apix"));
        assert!(!is_mounted("/api", "/health"));
        assert!(is_mounted("", "/anything"));
    }

    #[test]
    fn test_normalize_mount_point() {
        assert_eq!(normalize_mount_point("/api/"), "/api");
        assert_eq!(normalize_mount_point("/"), "");
        assert_eq!(normalize_mount_point(""), "");
    }
}
