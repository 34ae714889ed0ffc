//! # Proxy Cache Module
//!
//! Keeps one outbound proxy target per `(address, service)` pair so repeated
//! requests to the same backend reuse one HTTP client and its connection pool
//! instead of paying connection setup on every request.
//!
//! ## Rust Concepts Used
//!
//! - `DashMap` for concurrent get-or-insert without a global lock
//! - `Arc<ProxyTarget>` so handlers hold an entry while other tasks insert new ones
//! - `url::Url` to validate resolved addresses before any connection is attempted

use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};

/// Transport settings for buffered proxy clients
///
/// No total request timeout is set: slow-starting responses must not be cut
/// off. These bound connection setup and idle reuse only.
#[derive(Debug, Clone)]
pub struct ProxyTransportConfig {
    /// TCP connect timeout (also bounds the TLS handshake)
    pub connect_timeout: Duration,
    /// TCP keep-alive probe interval
    pub tcp_keepalive: Duration,
    /// How long an idle pooled connection is kept
    pub pool_idle_timeout: Duration,
}

impl Default for ProxyTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            tcp_keepalive: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// A resolved backend and the client used to reach it
#[derive(Debug)]
pub struct ProxyTarget {
    /// Service the target was resolved for
    pub service: String,
    /// Parsed base URL of the backend
    pub base_url: Url,
    /// Pooled client for the buffered path
    pub client: reqwest::Client,
}

impl ProxyTarget {
    /// Full outbound URL for a forwarded path (with optional query)
    pub fn upstream_url(&self, path_and_query: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{}{}", base, path_and_query)
        } else {
            format!("{}/{}", base, path_and_query)
        }
    }
}

/// Normalize and validate a discovered address into a backend base URL
///
/// Addresses without a scheme (`host:port`) default to `http://`.
pub fn parse_target(address: &str) -> GatewayResult<Url> {
    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| GatewayError::proxy_construction(address, e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(GatewayError::proxy_construction(
            address,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(GatewayError::proxy_construction(address, "missing host"));
    }

    Ok(url)
}

/// Build the pooled client used by buffered forwarding
pub fn build_proxy_client(config: &ProxyTransportConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .tcp_keepalive(config.tcp_keepalive)
        .pool_idle_timeout(config.pool_idle_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Cache of proxy targets keyed by `(address, service)`
pub struct ProxyCache {
    targets: DashMap<(String, String), Arc<ProxyTarget>>,
    transport: ProxyTransportConfig,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::with_transport(ProxyTransportConfig::default())
    }

    pub fn with_transport(transport: ProxyTransportConfig) -> Self {
        Self {
            targets: DashMap::new(),
            transport,
        }
    }

    /// Return the cached target for `(address, service)`, creating it on first use
    ///
    /// A malformed address fails before anything is inserted, so a later call
    /// with the same key retries construction.
    pub fn get_or_create(&self, address: &str, service: &str) -> GatewayResult<Arc<ProxyTarget>> {
        let key = (address.to_string(), service.to_string());
        if let Some(existing) = self.targets.get(&key) {
            return Ok(existing.value().clone());
        }

        let base_url = parse_target(address)?;
        let target = self
            .targets
            .entry(key)
            .or_try_insert_with(|| {
                let client = build_proxy_client(&self.transport)
                    .map_err(|e| GatewayError::proxy_construction(address, e.to_string()))?;

                counter!("proxy_cache_entries_created_total").increment(1);
                info!(service = %service, url = %base_url, "Created proxy target");

                Ok::<_, GatewayError>(Arc::new(ProxyTarget {
                    service: service.to_string(),
                    base_url,
                    client,
                }))
            })?
            .value()
            .clone();

        debug!(service = %service, address = %address, "Proxy target ready");
        Ok(target)
    }

    /// Whether a target exists for `(address, service)`
    pub fn contains(&self, address: &str, service: &str) -> bool {
        self.targets
            .contains_key(&(address.to_string(), service.to_string()))
    }

    /// Drop the targets of `service` whose address is not in `live`
    ///
    /// Returns how many targets were evicted.
    pub fn retain_service(&self, service: &str, live: &[String]) -> usize {
        let before = self.targets.len();
        self.targets
            .retain(|(address, name), _| name != service || live.iter().any(|a| a == address));
        let evicted = before.saturating_sub(self.targets.len());

        if evicted > 0 {
            counter!("proxy_cache_entries_evicted_total").increment(evicted as u64);
            debug!(service = %service, evicted = evicted, "Evicted stale proxy targets");
        }
        evicted
    }

    /// Number of cached targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Drop every cached target
    pub fn clear(&self) {
        self.targets.clear();
    }
}

impl Default for ProxyCache {
    fn default() -> Self {
        Self::new()
    }
}
