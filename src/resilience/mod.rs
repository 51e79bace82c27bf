//! 弹性模块：保护外部服务调用的限流器与熔断器。
//!
//! # Resilience Primitives Module
//!
//! The two process-wide stores that protect calls to external providers. Both are
//! plain values meant to be created once at startup and shared through `Arc`.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Sliding-window-log limiter keyed by (client, service) |
//! | [`circuit_breaker`] | Closed / open / half-open breaker keyed by service |
//!
//! ## Rate Limiter
//!
//! ```rust
//! use study_companion::resilience::rate_limiter::{RateLimiter, RateLimiterConfig, ServiceLimit};
//!
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new().with_service("assemblyai", ServiceLimit::per_minute(10)),
//! );
//! let decision = limiter.check("203.0.113.7", "assemblyai");
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining, 9);
//! ```
//!
//! ## Circuit Breaker
//!
//! ```rust
//! use study_companion::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, GuardError};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::new().with_failure_threshold(1));
//! let first = breaker.guard_blocking("cohere", || Err::<(), _>("HTTP 503"));
//! assert!(matches!(first, Err(GuardError::Upstream("HTTP 503"))));
//!
//! // The breaker is now open and fails fast without calling the provider.
//! let second = breaker.guard_blocking("cohere", || Ok::<_, &str>(()));
//! assert!(matches!(second, Err(GuardError::Open(_))));
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{
    BreakerSettings, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitSnapshot,
    CircuitState, GuardError,
};
pub use rate_limiter::{
    Decision, RateLimitExceeded, RateLimiter, RateLimiterConfig, ServiceLimit, DEFAULT_SERVICE,
};
