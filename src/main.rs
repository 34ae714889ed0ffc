//! # Edge Gateway - Main Entry Point
//!
//! Startup sequence:
//! 1. load configuration (`GATEWAY_CONFIG_PATH`, default `config/gateway.yaml`)
//! 2. initialize structured logging
//! 3. build the load balancer and the discovery backend (registry discovery
//!    performs its initial fetch and starts refreshing here)
//! 4. load routes (route file if configured, inline routes otherwise)
//! 5. serve until SIGINT/SIGTERM, then stop discovery

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use edge_gateway::core::config::GatewayConfig;
use edge_gateway::discovery::create_service_discovery;
use edge_gateway::gateway::{GatewayDispatcher, GatewayServer};
use edge_gateway::load_balancing::{LoadBalancer, RoundRobinBalancer};
use edge_gateway::middleware::SlidingWindowLimiter;
use edge_gateway::observability::init_logging;
use edge_gateway::proxy::StreamingPolicy;
use edge_gateway::routing::load_routes_from_file;
use edge_gateway::GatewayResult;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Failed to start gateway: {}", e);
        eprintln!("edge-gateway: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> GatewayResult<()> {
    let config_path = std::env::var("GATEWAY_CONFIG_PATH")
        .unwrap_or_else(|_| "config/gateway.yaml".to_string());
    let config = GatewayConfig::load(&config_path).await?;

    init_logging(&config.logging)?;

    info!("🚀 Starting Edge Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration loaded from {}", config_path);

    let balancer: Arc<dyn LoadBalancer> = Arc::new(RoundRobinBalancer::new());
    let discovery = create_service_discovery(&config.discovery, balancer).await?;
    info!("🔗 Service discovery ready ({})", discovery.discovery_type());

    let routes = match &config.routes_file {
        Some(path) => load_routes_from_file(path).await?,
        None => config.routes.clone(),
    };

    let dispatcher = GatewayDispatcher::new(discovery.clone())?
        .with_streaming_policy(StreamingPolicy::new(config.streaming.prefixes.clone()))
        .with_max_request_size(config.server.max_request_size);
    dispatcher.load_routes(routes)?;
    info!("🛣️  Routes loaded: {}", dispatcher.routes().len());

    let limiter = config.rate_limit.enabled.then(|| {
        Arc::new(SlidingWindowLimiter::new(
            config.rate_limit.requests,
            config.rate_limit.window,
        ))
    });

    let server = GatewayServer::new(&config.server, Arc::new(dispatcher), limiter);
    info!("🌐 Listening on {} (mount point {:?})", server.bind_addr(), config.server.mount_point);

    let result = server.serve(shutdown_signal()).await;

    info!("🛑 Stopping service discovery...");
    discovery.shutdown().await;

    match &result {
        Ok(()) => info!("✅ Edge Gateway shutdown complete"),
        Err(e) => error!("🚨 Server error: {}", e),
    }
    result
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("📡 Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("📡 Received SIGTERM, initiating graceful shutdown..."),
    }
}
