//! Resilience layer (§1 item 4): circuit breaker, retry, and the glue that
//! wraps every provider call in both.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, BreakerRegistry, BreakerStats, CircuitState};
pub use retry::{retry_call, RetryConfig};
