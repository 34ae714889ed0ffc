//! # Router Module
//!
//! This module implements request routing by longest path prefix. A route binds a
//! path prefix to a logical service name; the most specific (longest) prefix that
//! matches the request path wins, so `/api/agent` overrides `/api`.
//!
//! Route sets are small and loaded at startup, so matching is a linear scan over
//! the registered routes. Ties on prefix length go to the route registered first.
//!
//! ## Rust Concepts Used
//!
//! - `Option<&Route>` for "matched or not found" without sentinel values
//! - `serde` attributes to keep the JSON route file format (`stripPrefix`)
//! - Borrowed `&str` slices for prefix stripping without extra allocation on the hot path

use crate::core::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Route definition binding a path prefix to a backend service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Path prefix (e.g., "/api/auth")
    pub path: String,

    /// Target service name resolved through service discovery
    pub service: String,

    /// Remove the matched prefix before forwarding
    #[serde(default)]
    pub strip_prefix: bool,

    /// Timeout in seconds carried with the route definition
    #[serde(default)]
    pub timeout: u64,

    /// Forward through the streaming path regardless of configured prefixes
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub streaming: bool,
}

impl Route {
    /// Create a new route
    pub fn new<P: Into<String>, S: Into<String>>(path: P, service: S) -> Self {
        Self {
            path: path.into(),
            service: service.into(),
            strip_prefix: false,
            timeout: 0,
            streaming: false,
        }
    }

    /// Strip the matched prefix before forwarding
    pub fn strip_prefix(mut self, strip: bool) -> Self {
        self.strip_prefix = strip;
        self
    }

    /// Set the route timeout in seconds
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Mark this route as streaming
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Check whether this route's prefix covers the given path
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.path)
    }

    /// Path to send upstream for the given inbound path
    pub fn forward_path<'a>(&self, path: &'a str) -> std::borrow::Cow<'a, str> {
        if self.strip_prefix {
            std::borrow::Cow::Owned(strip_route_prefix(path, &self.path))
        } else {
            std::borrow::Cow::Borrowed(path)
        }
    }
}

/// Remove `prefix` from `path`, always leaving a leading `/`
///
/// `/api/agent/chat` with prefix `/api/agent` becomes `/chat`, and the prefix
/// itself becomes `/`.
pub fn strip_route_prefix(path: &str, prefix: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

/// Ordered, validated set of routes
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Create an empty route table
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Build a table from a list of routes, rejecting empty prefixes
    pub fn from_routes(routes: Vec<Route>) -> GatewayResult<Self> {
        let mut table = Self::new();
        for route in routes {
            table.add_route(route)?;
        }
        Ok(table)
    }

    /// Add a route to the end of the table
    pub fn add_route(&mut self, route: Route) -> GatewayResult<()> {
        if route.path.is_empty() {
            return Err(GatewayError::config(format!(
                "Route for service {} has an empty path prefix",
                route.service
            )));
        }
        if route.service.is_empty() {
            return Err(GatewayError::config(format!(
                "Route {} has an empty service name",
                route.path
            )));
        }
        self.routes.push(route);
        Ok(())
    }

    /// Match a request path to the route with the longest matching prefix
    ///
    /// # Example
    /// ```rust
    /// use edge_gateway::routing::{Route, RouteTable};
    ///
    /// let table = RouteTable::from_routes(vec![
    ///     Route::new("/api", "api-service"),
    ///     Route::new("/api/agent", "agent-service"),
    /// ]).unwrap();
    ///
    /// let route = table.match_route("/api/agent/x").unwrap();
    /// assert_eq!(route.service, "agent-service");
    /// ```
    pub fn match_route(&self, path: &str) -> Option<&Route> {
        let mut best: Option<&Route> = None;

        for route in &self.routes {
            // Strictly greater keeps the first registered route on ties
            if route.matches(path) && best.map_or(true, |b| route.path.len() > b.path.len()) {
                best = Some(route);
            }
        }

        best
    }

    /// All registered routes in registration order
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if the table has any routes
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Routes used when no route configuration is supplied
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new("/api/auth", "auth-service").strip_prefix(true).timeout(10),
        Route::new("/api/users", "user-service").strip_prefix(true).timeout(10),
    ]
}

/// Load routes from a JSON file containing an array of route objects
pub async fn load_routes_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Vec<Route>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        GatewayError::config(format!("Failed to read route file {}: {}", path.display(), e))
    })?;

    let routes: Vec<Route> = serde_json::from_str(&content).map_err(|e| {
        GatewayError::config(format!("Failed to parse route file {}: {}", path.display(), e))
    })?;

    info!(path = %path.display(), count = routes.len(), "Loaded routes from file");
    Ok(routes)
}

/// Save routes to a JSON file (pretty-printed)
pub async fn save_routes_to_file<P: AsRef<Path>>(routes: &[Route], path: P) -> GatewayResult<()> {
    let path = path.as_ref();
    let data = serde_json::to_string_pretty(routes)?;
    tokio::fs::write(path, data).await?;

    info!(path = %path.display(), count = routes.len(), "Saved routes to file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(routes: Vec<Route>) -> RouteTable {
        RouteTable::from_routes(routes).unwrap()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = table(vec![
            Route::new("/api", "api-service"),
            Route::new("/api/agent", "agent-service"),
        ]);

        assert_eq!(table.match_route("/api/agent/x").unwrap().service, "agent-service");
        assert_eq!(table.match_route("/api/users").unwrap().service, "api-service");
    }

    #[test]
    fn test_registration_order_does_not_affect_specificity() {
        let table = table(vec![
            Route::new("/api/agent", "agent-service"),
            Route::new("/api", "api-service"),
        ]);

        assert_eq!(table.match_route("/api/agent/chat").unwrap().service, "agent-service");
    }

    #[test]
    fn test_tie_resolves_to_first_registered() {
        let table = table(vec![
            Route::new("/api/auth", "first"),
            Route::new("/api/auth", "second"),
        ]);

        assert_eq!(table.match_route("/api/auth/login").unwrap().service, "first");
    }

    #[test]
    fn test_no_match_returns_none() {
        let empty = RouteTable::new();
        assert!(empty.match_route("/anything").is_none());

        let table = table(vec![Route::new("/api/auth", "auth-service")]);
        assert!(table.match_route("/health").is_none());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let result = RouteTable::from_routes(vec![Route::new("", "auth-service")]);
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }

    #[test]
    fn test_strip_route_prefix() {
        assert_eq!(strip_route_prefix("/api/agent/chat", "/api/agent"), "/chat");
        assert_eq!(strip_route_prefix("/api/agent", "/api/agent"), "/");
        assert_eq!(strip_route_prefix("/api/agentx", "/api/agent"), "/x");
        assert_eq!(strip_route_prefix("/api/auth/", "/api/auth"), "/");
    }

    #[test]
    fn test_forward_path_respects_strip_flag() {
        let stripped = Route::new("/api/auth", "auth-service").strip_prefix(true);
        assert_eq!(stripped.forward_path("/api/auth/verify"), "/verify");

        let kept = Route::new("/api/auth", "auth-service");
        assert_eq!(kept.forward_path("/api/auth/verify"), "/api/auth/verify");
    }

    #[test]
    fn test_route_json_field_names() {
        let json = r#"[{"path":"/api/auth","service":"auth-service","stripPrefix":true,"timeout":10}]"#;
        let routes: Vec<Route> = serde_json::from_str(json).unwrap();

        assert_eq!(routes[0], Route::new("/api/auth", "auth-service").strip_prefix(true).timeout(10));
        assert!(!routes[0].streaming);

        let out = serde_json::to_value(&routes[0]).unwrap();
        assert_eq!(out["stripPrefix"], true);
        assert!(out.get("streaming").is_none());
    }

    #[test]
    fn test_default_routes() {
        let routes = default_routes();
        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.strip_prefix && r.timeout == 10));
    }

    #[tokio::test]
    async fn test_route_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.json");
        let routes = vec![
            Route::new("/api/auth", "auth-service").strip_prefix(true).timeout(10),
            Route::new("/api/agent", "agent-service").streaming(true),
        ];

        save_routes_to_file(&routes, &path).await.unwrap();
        let loaded = load_routes_from_file(&path).await.unwrap();

        assert_eq!(loaded, routes);
    }

    #[tokio::test]
    async fn test_missing_route_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_routes_from_file(dir.path().join("missing.json")).await;
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }
}
