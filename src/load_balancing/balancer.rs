//! # Load Balancer Module
//!
//! This module picks one backend address out of the instances discovery found
//! for a service. The gateway ships a per-service round-robin strategy: each
//! selection key (the service name) owns an independent position counter, so
//! traffic to one service never shifts the rotation of another.
//!
//! ## Rust Concepts Explained
//!
//! - Trait objects (`Arc<dyn LoadBalancer>`) let discovery stay generic over strategies
//! - `Send + Sync` bounds make a balancer shareable across request tasks
//! - `parking_lot::Mutex` guards the counter map; it is never held across `.await`
//!
//! ## Usage Example
//!
//! ```rust
//! use edge_gateway::load_balancing::{LoadBalancer, RoundRobinBalancer};
//!
//! let balancer = RoundRobinBalancer::new();
//! let instances = vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()];
//!
//! assert_eq!(balancer.select("auth-service", &instances).as_deref(), Some("10.0.0.1:80"));
//! assert_eq!(balancer.select("auth-service", &instances).as_deref(), Some("10.0.0.2:80"));
//! ```

use metrics::counter;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Core trait for load balancing algorithms
pub trait LoadBalancer: Send + Sync {
    /// Select an instance address for `key` from the available pool
    ///
    /// # Returns
    /// * `Some(address)` - The chosen instance
    /// * `None` - `instances` was empty
    fn select(&self, key: &str, instances: &[String]) -> Option<String>;

    /// Get the algorithm name for metrics and logging
    fn algorithm_name(&self) -> &'static str;

    /// Reset internal state (useful for testing or reconfiguration)
    fn reset(&self);
}

/// Round-robin load balancer with one counter per selection key
///
/// The counter for a key starts at zero and advances by one on every successful
/// selection, wrapping on overflow. The index is taken modulo the current list
/// length, so instance lists may grow or shrink between calls.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counters: Mutex<HashMap<String, usize>>,
}

impl RoundRobinBalancer {
    /// Create a new round-robin load balancer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value for a key (zero if never selected)
    pub fn position(&self, key: &str) -> usize {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, key: &str, instances: &[String]) -> Option<String> {
        if instances.is_empty() {
            counter!("load_balancer_failed_selections").increment(1);
            return None;
        }

        let index = {
            let mut counters = self.counters.lock();
            let counter = counters.entry(key.to_string()).or_insert(0);
            let index = *counter % instances.len();
            *counter = counter.wrapping_add(1);
            index
        };

        let selected = instances[index].clone();
        debug!(
            key = %key,
            instance_address = %selected,
            algorithm = "round_robin",
            "Selected instance for load balancing"
        );

        Some(selected)
    }

    fn algorithm_name(&self) -> &'static str {
        "round_robin"
    }

    fn reset(&self) {
        self.counters.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn addrs(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("10.0.0.{}:8080", i)).collect()
    }

    #[test]
    fn test_round_robin_cycles_every_instance() {
        let balancer = RoundRobinBalancer::new();
        let instances = addrs(3);

        let picks: Vec<String> = (0..6)
            .map(|_| balancer.select("svc", &instances).unwrap())
            .collect();

        assert_eq!(&picks[..3], &instances[..]);
        assert_eq!(&picks[3..], &instances[..]);
    }

    #[test]
    fn test_counters_are_per_key() {
        let balancer = RoundRobinBalancer::new();
        let instances = addrs(2);

        assert_eq!(balancer.select("a", &instances).unwrap(), instances[0]);
        assert_eq!(balancer.select("a", &instances).unwrap(), instances[1]);
        // A different key starts at its own first instance
        assert_eq!(balancer.select("b", &instances).unwrap(), instances[0]);
        assert_eq!(balancer.position("a"), 2);
        assert_eq!(balancer.position("b"), 1);
    }

    #[test]
    fn test_empty_instances_returns_none() {
        let balancer = RoundRobinBalancer::new();
        assert!(balancer.select("svc", &[]).is_none());
        assert_eq!(balancer.position("svc"), 0);
    }

    #[test]
    fn test_list_shrinking_between_calls() {
        let balancer = RoundRobinBalancer::new();
        let three = addrs(3);
        balancer.select("svc", &three);
        balancer.select("svc", &three);

        // counter is 2, a single-instance list still yields its only member
        let one = addrs(1);
        assert_eq!(balancer.select("svc", &one).unwrap(), one[0]);
    }

    #[test]
    fn test_reset_clears_counters() {
        let balancer = RoundRobinBalancer::new();
        let instances = addrs(2);
        balancer.select("svc", &instances);
        balancer.reset();
        assert_eq!(balancer.select("svc", &instances).unwrap(), instances[0]);
    }

    #[test]
    fn test_concurrent_selection_is_even() {
        let balancer = Arc::new(RoundRobinBalancer::new());
        let instances = Arc::new(addrs(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let balancer = balancer.clone();
                let instances = instances.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| balancer.select("svc", &instances).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for pick in handle.join().unwrap() {
                *counts.entry(pick).or_default() += 1;
            }
        }

        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 100));
    }
}
