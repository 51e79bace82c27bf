//! # study-companion
//!
//! 学习助手运行时：为语音、检索与大模型服务调用提供限流与熔断保护。
//!
//! Study assistant runtime - rate limiting and circuit breaking around the speech,
//! retrieval and language-model providers of an AI study companion.
//!
//! ## Overview
//!
//! The crate is built around two process-wide protective stores:
//!
//! - a sliding-window-log [`RateLimiter`] that caps requests per client and per
//!   service inside a trailing time window, and
//! - a per-service [`CircuitBreaker`] that stops calling a failing provider for a
//!   cool-down period and then lets a single probe through.
//!
//! On top of them, [`StudyAssistant`] dispatches API requests (chat, transcription,
//! speech synthesis, knowledge search, session summaries) through a guard chain and
//! falls back across language models when one is unavailable.
//!
//! ## Quick Start
//!
//! ```rust
//! use study_companion::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
//!
//! # async fn demo() -> study_companion::Result<()> {
//! let limiter = RateLimiter::new(RateLimiterConfig::default());
//! let decision = limiter.check("203.0.113.7", "assemblyai");
//! assert!(decision.allowed);
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let text = breaker
//!     .guard("cohere", || async { Ok::<_, study_companion::Error>("hello".to_string()) })
//!     .await?;
//! assert_eq!(text, "hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Rate limiter and circuit breaker |
//! | [`middleware`] | Guard chain and rate limit response headers |
//! | [`assistant`] | Request dispatcher, sessions, prompts |
//! | [`knowledge`] | Embedding-based knowledge base |
//! | [`providers`] | Language model, speech and embedding traits |
//! | [`config`] | YAML configuration |
//! | [`clock`] | Injectable time source |
//! | [`telemetry`] | Logging setup |

pub mod assistant;
pub mod clock;
pub mod config;
pub mod knowledge;
pub mod middleware;
pub mod providers;
pub mod resilience;
pub mod telemetry;

pub use assistant::{ApiRequest, ApiResponse, StudyAssistant, StudyAssistantBuilder};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::StudyConfig;
pub use resilience::{
    CircuitBreaker, CircuitOpenError, CircuitState, Decision, GuardError, RateLimitExceeded,
    RateLimiter,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
