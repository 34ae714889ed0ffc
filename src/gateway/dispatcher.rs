//! # Gateway Dispatcher
//!
//! Composes route matching, service discovery and the proxy cache into the
//! per-request pipeline:
//!
//! 1. match the longest route prefix (404 when none)
//! 2. resolve the route's service to an address (503 when unavailable)
//! 3. get or create the proxy target for that address (500 when malformed),
//!    evicting targets for addresses discovery has dropped
//! 4. rewrite the path, keep the query string, add forwarding headers
//! 5. forward through the streaming or the buffered path (502 on transport failure)
//!
//! Every failure is turned into the structured JSON error body here, so nothing
//! escapes to the HTTP runtime's default error handling.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::discovery::ServiceDiscovery;
use crate::proxy::{
    BufferedForwarder, ForwardRequest, ProxyCache, StreamingForwarder, StreamingPolicy,
};
use crate::routing::{Route, RouteTable};

/// Default inbound body limit (10MB)
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Per-request orchestration over routes, discovery and forwarders
pub struct GatewayDispatcher {
    /// Active route table, swapped whole on reload
    routes: RwLock<Arc<RouteTable>>,
    discovery: Arc<dyn ServiceDiscovery>,
    proxies: ProxyCache,
    streaming_policy: StreamingPolicy,
    buffered: BufferedForwarder,
    streaming: StreamingForwarder,
    max_request_size: usize,
}

impl GatewayDispatcher {
    /// Create a dispatcher with an empty route table
    pub fn new(discovery: Arc<dyn ServiceDiscovery>) -> GatewayResult<Self> {
        Ok(Self {
            routes: RwLock::new(Arc::new(RouteTable::new())),
            discovery,
            proxies: ProxyCache::new(),
            streaming_policy: StreamingPolicy::default(),
            buffered: BufferedForwarder::new(),
            streaming: StreamingForwarder::new()?,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
        })
    }

    pub fn with_streaming_policy(mut self, policy: StreamingPolicy) -> Self {
        self.streaming_policy = policy;
        self
    }

    pub fn with_max_request_size(mut self, max_request_size: usize) -> Self {
        self.max_request_size = max_request_size;
        self
    }

    /// Validate and atomically replace the active routes
    ///
    /// In-flight requests keep the table they started with.
    pub fn load_routes(&self, routes: Vec<Route>) -> GatewayResult<()> {
        let table = RouteTable::from_routes(routes)?;
        let count = table.len();
        *self.routes.write() = Arc::new(table);
        info!(routes = count, "Route table loaded");
        Ok(())
    }

    /// Snapshot of the active route table
    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.read().clone()
    }

    pub fn discovery(&self) -> &Arc<dyn ServiceDiscovery> {
        &self.discovery
    }

    pub fn proxy_cache(&self) -> &ProxyCache {
        &self.proxies
    }

    /// Handle one inbound request, always producing a response
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let path = request.uri().path().to_string();
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    GatewayError::RouteNotFound { .. } => {
                        debug!(path = %path, "No route for request")
                    }
                    _ => warn!(
                        path = %path,
                        error = %e,
                        error_type = e.error_type(),
                        "Request dispatch failed"
                    ),
                }
                e.into_response()
            }
        }
    }

    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    async fn dispatch(&self, request: Request<Body>) -> GatewayResult<Response> {
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();

        let table = self.routes();
        let route = table.match_route(path).ok_or_else(|| {
            counter!("gateway_route_misses_total").increment(1);
            GatewayError::route_not_found(path)
        })?;

        let address = self.discovery.discover(&route.service).await?;
        let new_target = !self.proxies.contains(&address, &route.service);
        let target = self.proxies.get_or_create(&address, &route.service)?;
        if new_target {
            // Drop targets for addresses discovery no longer reports
            if let Some(live) = self.discovery.known_instances(&route.service) {
                self.proxies.retain_service(&route.service, &live);
            }
        }

        let forward_path = route.forward_path(path);
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{}?{}", forward_path, query),
            None => forward_path.into_owned(),
        };

        let streaming = self.streaming_policy.is_streaming(route, path);
        let mode = if streaming { "streaming" } else { "buffered" };
        counter!("gateway_requests_total", "service" => route.service.clone(), "mode" => mode)
            .increment(1);

        info!(
            service = %route.service,
            address = %address,
            upstream_path = %path_and_query,
            mode = mode,
            route_timeout = route.timeout,
            "Forwarding request"
        );

        let body = axum::body::to_bytes(body, self.max_request_size)
            .await
            .map_err(|e| GatewayError::invalid_request(format!("failed to read request body: {}", e)))?;

        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let request = ForwardRequest {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
            client_addr,
        };

        if streaming {
            self.streaming.forward(&target, request).await
        } else {
            self.buffered.forward(&target, request).await
        }
    }
}
