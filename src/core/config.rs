//! # Configuration Module
//!
//! This module holds the gateway configuration structures and the loading path:
//! YAML file (or defaults when the file is absent), then environment variable
//! overrides, then validation.
//!
//! ## Key Features
//! - YAML configuration parsing with serde
//! - Human-readable durations (`30s`, `1m`) through `humantime-serde`
//! - Environment variable override support (`GATEWAY_*`)
//! - Validation that collects every problem into one error message

use crate::core::error::{GatewayError, GatewayResult};
use crate::routing::router::{default_routes, Route};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings and mount point
    pub server: ServerConfig,

    /// How service names resolve to addresses
    pub discovery: DiscoveryConfig,

    /// Inline route definitions
    pub routes: Vec<Route>,

    /// JSON route file; replaces `routes` when set
    pub routes_file: Option<PathBuf>,

    /// Which requests take the streaming path
    pub streaming: StreamingConfig,

    /// Per-client admission control
    pub rate_limit: RateLimitConfig,

    /// Log level, format and destination
    pub logging: LoggingConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            discovery: DiscoveryConfig::default(),
            routes: default_routes(),
            routes_file: None,
            streaming: StreamingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration for startup
    ///
    /// A missing file is not an error: defaults are used and env overrides still apply.
    pub async fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let mut config = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::parse_file(path).await?
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let mut config = Self::parse_file(path.as_ref()).await?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    async fn parse_file(path: &Path) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string without env overrides
    pub fn from_yaml(content: &str) -> GatewayResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("GATEWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_PORT: {}", e)))?;
        }

        if let Some(addr) = lookup("GATEWAY_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(mount) = lookup("GATEWAY_MOUNT_POINT") {
            self.server.mount_point = mount;
        }

        if let Some(origins) = lookup("GATEWAY_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(base_url) = lookup("GATEWAY_REGISTRY_URL") {
            self.discovery = match std::mem::take(&mut self.discovery) {
                DiscoveryConfig::Static { services } => DiscoveryConfig::Registry {
                    base_url,
                    services: services.into_keys().collect(),
                    refresh_interval: default_refresh_interval(),
                },
                DiscoveryConfig::Registry {
                    services,
                    refresh_interval,
                    ..
                } => DiscoveryConfig::Registry {
                    base_url,
                    services,
                    refresh_interval,
                },
            };
        }

        if let Some(requests) = lookup("GATEWAY_RATE_LIMIT_REQUESTS") {
            self.rate_limit.requests = requests.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_RATE_LIMIT_REQUESTS: {}", e))
            })?;
        }

        if let Some(window) = lookup("GATEWAY_RATE_LIMIT_WINDOW") {
            self.rate_limit.window = humantime::parse_duration(&window).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_RATE_LIMIT_WINDOW: {}", e))
            })?;
        }

        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                other => {
                    return Err(GatewayError::config(format!(
                        "Invalid GATEWAY_LOG_FORMAT: {} (expected json or text)",
                        other
                    )))
                }
            };
        }

        if let Some(output) = lookup("GATEWAY_LOG_OUTPUT") {
            self.logging.output = if output.eq_ignore_ascii_case("stdout") {
                LogOutput::Stdout
            } else {
                LogOutput::File { path: output }
            };
        }

        if let Some(file) = lookup("GATEWAY_ROUTES_FILE") {
            self.routes_file = Some(PathBuf::from(file));
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("port must be greater than 0".to_string());
        }

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.max_request_size == 0 {
            errors.push("max_request_size must be greater than 0".to_string());
        }

        if !self.server.mount_point.is_empty() && !self.server.mount_point.starts_with('/') {
            errors.push(format!(
                "mount_point '{}' must start with '/'",
                self.server.mount_point
            ));
        }

        for (index, route) in self.routes.iter().enumerate() {
            if route.path.is_empty() {
                errors.push(format!("Route {} has empty path", index));
            }
            if route.service.is_empty() {
                errors.push(format!("Route '{}' has empty service", route.path));
            }
        }

        match &self.discovery {
            DiscoveryConfig::Static { services } => {
                for (name, addresses) in services {
                    if addresses.iter().any(|a| a.is_empty()) {
                        errors.push(format!("Service '{}' has an empty address", name));
                    }
                }
            }
            DiscoveryConfig::Registry {
                base_url,
                refresh_interval,
                ..
            } => {
                if base_url.is_empty() {
                    errors.push("registry base_url cannot be empty".to_string());
                } else if let Err(e) = Url::parse(base_url) {
                    errors.push(format!("registry base_url '{}' is invalid: {}", base_url, e));
                }
                if refresh_interval.is_zero() {
                    errors.push("registry refresh_interval must be greater than 0".to_string());
                }
            }
        }

        if self.rate_limit.enabled {
            if self.rate_limit.window.is_zero() {
                errors.push("rate_limit window must be greater than 0".to_string());
            }
            if self.rate_limit.requests == 0 {
                errors.push("rate_limit requests must be greater than 0".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(format!(
                "Configuration validation failed: {}",
                errors.join(", ")
            )))
        }
    }

    /// Socket address string the server binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Path under which every request is dispatched (empty mounts at the root)
    pub mount_point: String,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Maximum inbound request body size in bytes
    pub max_request_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            mount_point: "/api".to_string(),
            cors_origins: vec!["*".to_string()],
            max_request_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Service discovery backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryConfig {
    /// Fixed service name to address map
    Static {
        #[serde(default)]
        services: HashMap<String, Vec<String>>,
    },

    /// Registry-backed cache refreshed in the background
    Registry {
        base_url: String,
        /// Services fetched at start and on every refresh
        #[serde(default)]
        services: Vec<String>,
        #[serde(with = "humantime_serde", default = "default_refresh_interval")]
        refresh_interval: Duration,
    },
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::Static {
            services: HashMap::new(),
        }
    }
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

/// Streaming path selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Request path prefixes that are always streamed
    pub prefixes: Vec<String>,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            prefixes: vec!["/api/agent".to_string()],
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the rate limiting middleware
    pub enabled: bool,

    /// Requests admitted per client within one window
    pub requests: usize,

    /// Sliding window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format
    pub format: LogFormat,

    /// Output destination
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            output: LogOutput::Stdout,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

/// Log output destinations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    File { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.mount_point, "/api");
        assert_eq!(config.streaming.prefixes, vec!["/api/agent"]);
        assert_eq!(config.rate_limit.requests, 100);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.routes.len(), 2);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  port: 9000
discovery:
  type: registry
  base_url: http://registry:8500
  services: [auth-service]
  refresh_interval: 10s
routes:
  - path: /api/auth
    service: auth-service
    stripPrefix: true
    timeout: 10
rate_limit:
  requests: 2
  window: 1s
logging:
  format: text
  output:
    type: file
    path: /tmp/gateway.log
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.mount_point, "/api");
        match &config.discovery {
            DiscoveryConfig::Registry {
                base_url,
                services,
                refresh_interval,
            } => {
                assert_eq!(base_url, "http://registry:8500");
                assert_eq!(services, &vec!["auth-service".to_string()]);
                assert_eq!(*refresh_interval, Duration::from_secs(10));
            }
            other => panic!("expected registry discovery, got {:?}", other),
        }
        assert!(config.routes[0].strip_prefix);
        assert_eq!(config.rate_limit.window, Duration::from_secs(1));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(
            config.logging.output,
            LogOutput::File {
                path: "/tmp/gateway.log".to_string()
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_registry_refresh_interval_defaults_to_30s() {
        let yaml = "discovery:\n  type: registry\n  base_url: http://registry:8500\n";
        let config = GatewayConfig::from_yaml(yaml).unwrap();

        match config.discovery {
            DiscoveryConfig::Registry {
                refresh_interval, ..
            } => assert_eq!(refresh_interval, Duration::from_secs(30)),
            other => panic!("expected registry discovery, got {:?}", other),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        if let DiscoveryConfig::Static { services } = &mut config.discovery {
            services.insert("auth-service".to_string(), vec!["localhost:8001".to_string()]);
        }

        config
            .apply_overrides(env(&[
                ("GATEWAY_PORT", "9090"),
                ("GATEWAY_MOUNT_POINT", "/gw"),
                ("GATEWAY_REGISTRY_URL", "http://registry:8500"),
                ("GATEWAY_CORS_ORIGINS", "https://a.example, https://b.example"),
                ("GATEWAY_RATE_LIMIT_REQUESTS", "5"),
                ("GATEWAY_RATE_LIMIT_WINDOW", "2s"),
                ("GATEWAY_LOG_FORMAT", "text"),
                ("GATEWAY_LOG_OUTPUT", "stdout"),
                ("GATEWAY_ROUTES_FILE", "config/routes.json"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.mount_point, "/gw");
        assert_eq!(config.server.cors_origins.len(), 2);
        assert_eq!(config.rate_limit.requests, 5);
        assert_eq!(config.rate_limit.window, Duration::from_secs(2));
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.output, LogOutput::Stdout);
        assert_eq!(config.routes_file, Some(PathBuf::from("config/routes.json")));
        match &config.discovery {
            DiscoveryConfig::Registry { services, .. } => {
                assert_eq!(services, &vec!["auth-service".to_string()]);
            }
            other => panic!("expected registry discovery, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_env_override_is_config_error() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides(env(&[("GATEWAY_PORT", "not-a-port")]));
        assert!(matches!(result, Err(GatewayError::Configuration { .. })));
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = GatewayConfig::default();
        config.server.port = 0;
        config.server.mount_point = "api".to_string();
        config.routes.push(Route::new("", "orphan"));
        config.rate_limit.window = Duration::ZERO;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("port must be greater than 0"));
        assert!(message.contains("mount_point"));
        assert!(message.contains("empty path"));
        assert!(message.contains("window"));
    }

    #[test]
    fn test_registry_without_base_url_rejected() {
        let mut config = GatewayConfig::default();
        config.discovery = DiscoveryConfig::Registry {
            base_url: String::new(),
            services: vec![],
            refresh_interval: Duration::from_secs(30),
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig::load(dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config.routes, default_routes());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        tokio::fs::write(&path, "server:\n  mount_point: /edge\n").await.unwrap();

        let config = GatewayConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.server.mount_point, "/edge");
    }
}
