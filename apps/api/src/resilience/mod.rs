//! Process-wide guards around the remote capability: result cache, circuit
//! breaker and admission queue. Each is constructed once at startup and
//! shared by handle.

pub mod cache;
pub mod circuit_breaker;
pub mod queue;

pub use cache::{AnalysisCache, CacheConfig};
pub use circuit_breaker::{BreakerConfig, BreakerError, BreakerEvent, CircuitBreaker, CircuitState};
pub use queue::{QueueConfig, QueueError, QueueEvent, RequestQueue};
