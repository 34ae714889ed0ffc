//! # Rate Limiting
//!
//! Sliding-window admission control keyed by client address. Every admitted
//! request records its arrival time; a request is rejected when the client
//! already has `capacity` arrivals inside the trailing window.
//!
//! State lives in memory behind one mutex. A client's window is pruned on its
//! next check, and clients idle for a full window are swept out.
//!
//! ## Usage Example
//! ```rust
//! use edge_gateway::middleware::rate_limiting::SlidingWindowLimiter;
//! use std::time::Duration;
//!
//! let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(1));
//! assert!(limiter.check("10.0.0.1"));
//! assert!(limiter.check("10.0.0.1"));
//! assert!(!limiter.check("10.0.0.1"));
//! ```

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::core::error::GatewayError;

/// Per-client arrivals plus the time of the last stale-key sweep
#[derive(Debug)]
struct WindowState {
    arrivals: HashMap<String, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl WindowState {
    /// Keep only clients with an arrival still inside the window
    fn sweep(&mut self, now: Instant, window: Duration) {
        self.arrivals.retain(|_, arrivals| {
            arrivals
                .back()
                .map_or(false, |&last| now.saturating_duration_since(last) < window)
        });
        self.last_sweep = now;
    }
}

/// Sliding-window rate limiter
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    capacity: usize,
    window: Duration,
    state: Mutex<WindowState>,
}

impl SlidingWindowLimiter {
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            state: Mutex::new(WindowState {
                arrivals: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Admit or reject a request for `key` at the current time
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// Admit or reject a request for `key` at the given instant
    ///
    /// Once per window the whole map is swept, so keys that are never seen
    /// again do not accumulate.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut state = self.state.lock();
        if now.saturating_duration_since(state.last_sweep) >= self.window {
            state.sweep(now, self.window);
        }

        if let Some(arrivals) = state.arrivals.get_mut(key) {
            while let Some(&oldest) = arrivals.front() {
                if now.saturating_duration_since(oldest) >= self.window {
                    arrivals.pop_front();
                } else {
                    break;
                }
            }

            if arrivals.len() >= self.capacity {
                return false;
            }
            arrivals.push_back(now);
            return true;
        }

        if self.capacity == 0 {
            return false;
        }
        state
            .arrivals
            .insert(key.to_string(), VecDeque::from([now]));
        true
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of clients with recorded arrivals
    pub fn tracked_clients(&self) -> usize {
        self.state.lock().arrivals.len()
    }

    /// Drop keys whose arrivals have all left the window
    pub fn cleanup(&self) {
        self.state.lock().sweep(Instant::now(), self.window);
    }

    fn rejection(&self) -> GatewayError {
        GatewayError::RateLimited {
            limit: self.capacity,
            window: humantime::format_duration(self.window).to_string(),
        }
    }
}

/// Derive the rate limiting key for a request
///
/// The first `X-Forwarded-For` entry wins, then `X-Real-IP`, then the peer
/// address of the connection.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware rejecting requests over the limit with 429
pub async fn rate_limit(
    State(limiter): State<Arc<SlidingWindowLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = client_key(request.headers(), peer);

    if !limiter.check(&key) {
        counter!("rate_limit_rejections_total").increment(1);
        warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
        return limiter.rejection().into_response();
    }

    debug!(client = %key, "Request admitted by rate limiter");
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_capacity_then_reject_then_recover() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.check_at("client", start));
        assert!(limiter.check_at("client", start + Duration::from_millis(10)));
        assert!(!limiter.check_at("client", start + Duration::from_millis(20)));

        // first arrival leaves the window
        assert!(limiter.check_at("client", start + Duration::from_millis(1001)));
        assert!(!limiter.check_at("client", start + Duration::from_millis(1002)));
    }

    #[test]
    fn test_rejected_requests_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.check_at("client", start));
        assert!(!limiter.check_at("client", start + Duration::from_millis(500)));
        assert!(limiter.check_at("client", start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_cleanup_drops_idle_keys() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_millis(1));
        limiter.check("10.0.0.1");
        std::thread::sleep(Duration::from_millis(5));
        limiter.cleanup();
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_idle_keys_swept_after_window() {
        let limiter = SlidingWindowLimiter::new(10, Duration::from_secs(60));
        let start = Instant::now();

        for i in 0..10_000 {
            assert!(limiter.check_at(&format!("198.51.100.{}", i), start));
        }
        assert_eq!(limiter.tracked_clients(), 10_000);

        let later = start + Duration::from_secs(3600);
        for _ in 0..10 {
            assert!(limiter.check_at("203.0.113.7", later));
        }
        assert!(!limiter.check_at("203.0.113.7", later));
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_zero_capacity_tracks_nothing() {
        let limiter = SlidingWindowLimiter::new(0, Duration::from_secs(1));
        assert!(!limiter.check("10.0.0.1"));
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_client_key_precedence() {
        let peer: SocketAddr = "192.168.1.5:40000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers, Some(peer)), "192.168.1.5");
        assert_eq!(client_key(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("10.1.1.1"));
        assert_eq!(client_key(&headers, Some(peer)), "10.1.1.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_key(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn test_rejection_is_429() {
        let limiter = SlidingWindowLimiter::new(100, Duration::from_secs(60));
        let err = limiter.rejection();
        assert_eq!(err.status_code(), axum::http::StatusCode::TOO_MANY_REQUESTS);
        assert!(err.to_string().contains("100 requests per 1m"));
    }
}
