pub mod rate_limiting;

pub use rate_limiting::{client_key, rate_limit, SlidingWindowLimiter};
