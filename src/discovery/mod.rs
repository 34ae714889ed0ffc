pub mod service_discovery;

pub use service_discovery::{
    create_service_discovery, RegistryConfig, RegistryDiscovery, RegistryInstance,
    ServiceDiscovery, StaticDiscovery,
};
