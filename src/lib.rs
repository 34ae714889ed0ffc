//! # Edge Gateway Library - Core Library Crate
//!
//! A microservice edge gateway: requests are matched to a backend service by
//! longest path prefix, the service is resolved to a live address (static map
//! or a registry-backed cache), an instance is picked round-robin, and the
//! request is forwarded either buffered or streamed chunk by chunk.
//!
//! ## Request Pipeline
//!
//! ```text
//! client -> rate limiter -> route match -> discovery -> proxy cache
//!        -> buffered | streaming forwarder -> backend
//! ```
//!
//! ### Module Layout
//! - `core`: error types and configuration shared by every other module
//! - `routing`: route definitions and longest-prefix matching
//! - `discovery` + `load_balancing`: service name to instance address
//! - `proxy`: outbound clients, header rules and both forwarding strategies
//! - `gateway`: the dispatcher and the Axum server around it
//! - `middleware`: inbound admission control
//! - `observability`: logging setup

/// Core functionality including error types and configuration
pub mod core;

/// Route definitions, longest-prefix matching and route files
pub mod routing;

/// Instance selection strategies
pub mod load_balancing;

/// Static and registry-backed service discovery
pub mod discovery;

/// Outbound proxy targets and the buffered/streaming forwarders
pub mod proxy;

/// Request dispatcher and HTTP server
pub mod gateway;

/// Sliding-window rate limiting middleware
pub mod middleware;

/// Structured logging setup
pub mod observability;

// Re-export commonly used types for easier access
// Users can write `use edge_gateway::GatewayError` instead of `use edge_gateway::core::error::GatewayError`

/// Main error type used throughout the gateway
pub use core::error::{GatewayError, GatewayResult};

/// Main configuration structure for the gateway
pub use core::config::GatewayConfig;

pub use discovery::{create_service_discovery, ServiceDiscovery};
pub use gateway::{GatewayDispatcher, GatewayServer};
pub use routing::{Route, RouteTable};
