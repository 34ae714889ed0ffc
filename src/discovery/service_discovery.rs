//! # Service Discovery Module
//!
//! This module resolves a logical service name to one concrete backend address.
//! Two backends implement the same `ServiceDiscovery` trait:
//!
//! - `StaticDiscovery`: an in-memory map maintained by explicit register calls
//! - `RegistryDiscovery`: a cache filled from the registry's HTTP API, refreshed
//!   by one background task and filled on demand for services not yet cached
//!
//! Both hand the instance list to a `LoadBalancer`, keyed by the service name.
//!
//! ## Rust Concepts Used
//!
//! - `async_trait` for async methods in traits
//! - `Arc<dyn ServiceDiscovery>` so the dispatcher never knows which backend it has
//! - `parking_lot::RwLock` for the cache; network calls happen with no lock held
//! - `CancellationToken` to stop the refresh task and `JoinHandle` to await it

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::config::DiscoveryConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::load_balancing::LoadBalancer;

/// Service discovery trait that all discovery implementations must implement
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Resolve a service name to one instance address
    async fn discover(&self, service: &str) -> GatewayResult<String>;

    /// Release background resources; a no-op for backends without any
    async fn shutdown(&self) {}

    /// Currently known addresses for a service, without any network call
    ///
    /// `None` means the backend has no view of the service yet.
    fn known_instances(&self, _service: &str) -> Option<Vec<String>> {
        None
    }

    /// Backend name for logs
    fn discovery_type(&self) -> &'static str;
}

/// Pick an instance through the balancer or explain why none is available
fn select_instance(
    balancer: &dyn LoadBalancer,
    service: &str,
    instances: &[String],
) -> GatewayResult<String> {
    balancer
        .select(service, instances)
        .ok_or_else(|| GatewayError::service_unavailable(service, "no instances available"))
}

/// Static service discovery for fixed deployments and tests
pub struct StaticDiscovery {
    services: DashMap<String, Vec<String>>,
    balancer: Arc<dyn LoadBalancer>,
}

impl StaticDiscovery {
    pub fn new(balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            services: DashMap::new(),
            balancer,
        }
    }

    /// Build from a `name -> [address]` map
    pub fn with_services(
        services: &HashMap<String, Vec<String>>,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Self {
        let discovery = Self::new(balancer);
        for (name, addresses) in services {
            for address in addresses {
                discovery.register(name, address);
            }
        }
        discovery
    }

    /// Add an address for a service; registering the same address twice is a no-op
    pub fn register(&self, service: &str, address: &str) {
        let mut entry = self.services.entry(service.to_string()).or_default();
        if !entry.iter().any(|a| a == address) {
            entry.push(address.to_string());
            info!(service = %service, address = %address, "Registered static instance");
        }
    }

    /// Remove one address from a service
    pub fn unregister(&self, service: &str, address: &str) {
        if let Some(mut entry) = self.services.get_mut(service) {
            entry.retain(|a| a != address);
        }
    }

    /// Remove a service and all of its addresses
    pub fn unregister_service(&self, service: &str) {
        self.services.remove(service);
    }

    /// Snapshot of the addresses registered for a service
    pub fn list_instances(&self, service: &str) -> Vec<String> {
        self.services
            .get(service)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn discover(&self, service: &str) -> GatewayResult<String> {
        let instances = self.list_instances(service);
        if instances.is_empty() {
            return Err(GatewayError::service_unavailable(
                service,
                "no instances registered",
            ));
        }
        select_instance(self.balancer.as_ref(), service, &instances)
    }

    fn known_instances(&self, service: &str) -> Option<Vec<String>> {
        Some(self.list_instances(service))
    }

    fn discovery_type(&self) -> &'static str {
        "static"
    }
}

/// Registry client settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry base URL, e.g. `http://registry:8890`
    pub base_url: String,
    /// Services fetched at start and kept fresh by the refresh task
    pub services: Vec<String>,
    /// Period between background refreshes
    pub refresh_interval: Duration,
    /// Per-request timeout for registry calls
    pub request_timeout: Duration,
}

impl RegistryConfig {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            services: Vec::new(),
            refresh_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// One instance record as returned by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryInstance {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
    #[serde(default)]
    pub status: String,
}

impl RegistryInstance {
    /// Instances with no reported status are treated as healthy
    pub fn is_healthy(&self) -> bool {
        self.status.is_empty() || self.status == "passing"
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct RegistryListResponse {
    #[serde(default)]
    services: Option<Vec<RegistryInstance>>,
}

struct RegistryState {
    config: RegistryConfig,
    client: reqwest::Client,
    cache: RwLock<HashMap<String, Vec<String>>>,
}

impl RegistryState {
    async fn fetch_instances(&self, service: &str) -> GatewayResult<Vec<String>> {
        let url = format!("{}/api/service", self.config.base_url.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .query(&[("name", service)])
            .send()
            .await
            .map_err(|e| GatewayError::registry_unavailable(service, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::registry_unavailable(
                service,
                format!("registry returned {}", status),
            ));
        }

        let body: RegistryListResponse = response.json().await.map_err(|e| {
            GatewayError::registry_unavailable(service, format!("malformed response: {}", e))
        })?;

        let instances: Vec<String> = body
            .services
            .unwrap_or_default()
            .iter()
            .filter(|instance| instance.is_healthy())
            .map(RegistryInstance::endpoint)
            .collect();

        debug!(service = %service, count = instances.len(), "Fetched instances from registry");
        Ok(instances)
    }

    /// Replace the cached list on success; keep the previous list on failure
    async fn refresh_service(&self, service: &str) -> GatewayResult<()> {
        match self.fetch_instances(service).await {
            Ok(instances) => {
                self.cache.write().insert(service.to_string(), instances);
                Ok(())
            }
            Err(e) => {
                counter!("discovery_refresh_failures_total", "service" => service.to_string())
                    .increment(1);
                warn!(service = %service, error = %e, "Registry refresh failed, keeping cached instances");
                Err(e)
            }
        }
    }

    async fn refresh_all(&self) {
        let mut services = self.config.services.clone();
        {
            let cache = self.cache.read();
            for name in cache.keys() {
                if !services.contains(name) {
                    services.push(name.clone());
                }
            }
        }

        for service in &services {
            let _ = self.refresh_service(service).await;
        }
    }
}

/// A running refresh loop and the token that stops it
struct RefreshTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry-backed discovery with a periodically refreshed cache
pub struct RegistryDiscovery {
    state: Arc<RegistryState>,
    balancer: Arc<dyn LoadBalancer>,
    refresh: Mutex<Option<RefreshTask>>,
}

impl RegistryDiscovery {
    /// Create the component without contacting the registry
    pub fn new(config: RegistryConfig, balancer: Arc<dyn LoadBalancer>) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to build registry client: {}", e)))?;

        Ok(Self {
            state: Arc::new(RegistryState {
                config,
                client,
                cache: RwLock::new(HashMap::new()),
            }),
            balancer,
            refresh: Mutex::new(None),
        })
    }

    /// Create, populate and start refreshing in one call
    pub async fn connect(
        config: RegistryConfig,
        balancer: Arc<dyn LoadBalancer>,
    ) -> GatewayResult<Self> {
        let discovery = Self::new(config, balancer)?;
        discovery.start().await;
        Ok(discovery)
    }

    /// Fetch every configured service once, then spawn the refresh task
    ///
    /// Calling `start` again while the task is running does nothing. After
    /// `stop`, `start` spawns a new task with its own cancellation token.
    pub async fn start(&self) {
        if self.is_running() {
            return;
        }

        for service in &self.state.config.services {
            let _ = self.state.refresh_service(service).await;
        }

        let state = self.state.clone();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let period = self.state.config.refresh_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately and the initial fetch already ran
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => state.refresh_all().await,
                }
            }
            debug!("Registry refresh task stopped");
        });

        {
            let mut refresh = self.refresh.lock();
            if refresh.as_ref().map_or(true, |task| task.handle.is_finished()) {
                *refresh = Some(RefreshTask { cancel, handle });
            } else {
                cancel.cancel();
                handle.abort();
            }
        }

        info!(
            base_url = %self.state.config.base_url,
            interval = ?period,
            services = self.state.config.services.len(),
            "Registry discovery started"
        );
    }

    /// Cancel the refresh task and wait for it to finish
    pub async fn stop(&self) {
        let task = self.refresh.lock().take();
        if let Some(RefreshTask { cancel, handle }) = task {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Registry refresh task ended abnormally");
            }
        }
    }

    /// Query the registry for the healthy instances of a service
    pub async fn fetch_instances(&self, service: &str) -> GatewayResult<Vec<String>> {
        self.state.fetch_instances(service).await
    }

    /// Refresh every known service now, as the background task does
    pub async fn refresh(&self) {
        self.state.refresh_all().await;
    }

    /// Cached instances, falling back to one registry fetch when absent or empty
    #[instrument(skip(self))]
    pub async fn list_instances(&self, service: &str) -> GatewayResult<Vec<String>> {
        if let Some(instances) = self.lookup(service) {
            if !instances.is_empty() {
                return Ok(instances);
            }
        }

        let instances = self.state.fetch_instances(service).await?;
        self.state
            .cache
            .write()
            .insert(service.to_string(), instances.clone());
        Ok(instances)
    }

    /// Cached instances without touching the registry
    pub fn lookup(&self, service: &str) -> Option<Vec<String>> {
        self.state.cache.read().get(service).cloned()
    }

    /// Whether a refresh task is active and has not finished
    pub fn is_running(&self) -> bool {
        self.refresh
            .lock()
            .as_ref()
            .map_or(false, |task| !task.handle.is_finished())
    }
}

#[async_trait]
impl ServiceDiscovery for RegistryDiscovery {
    async fn discover(&self, service: &str) -> GatewayResult<String> {
        let instances = self.list_instances(service).await?;
        if instances.is_empty() {
            return Err(GatewayError::service_unavailable(
                service,
                "no healthy instances in registry",
            ));
        }
        select_instance(self.balancer.as_ref(), service, &instances)
    }

    async fn shutdown(&self) {
        self.stop().await;
    }

    fn known_instances(&self, service: &str) -> Option<Vec<String>> {
        self.lookup(service)
    }

    fn discovery_type(&self) -> &'static str {
        "registry"
    }
}

impl Drop for RegistryDiscovery {
    fn drop(&mut self) {
        if let Some(task) = self.refresh.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

/// Build the discovery backend described by the configuration
///
/// Registry discovery is returned already started.
pub async fn create_service_discovery(
    config: &DiscoveryConfig,
    balancer: Arc<dyn LoadBalancer>,
) -> GatewayResult<Arc<dyn ServiceDiscovery>> {
    match config {
        DiscoveryConfig::Static { services } => {
            Ok(Arc::new(StaticDiscovery::with_services(services, balancer)))
        }
        DiscoveryConfig::Registry {
            base_url,
            services,
            refresh_interval,
        } => {
            let mut registry = RegistryConfig::new(base_url.clone());
            registry.services = services.clone();
            registry.refresh_interval = *refresh_interval;
            let discovery = RegistryDiscovery::connect(registry, balancer).await?;
            Ok(Arc::new(discovery))
        }
    }
}
