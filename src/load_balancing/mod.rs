pub mod balancer;

pub use balancer::{LoadBalancer, RoundRobinBalancer};
