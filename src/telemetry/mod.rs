//! 日志模块：基于 tracing 的结构化日志初始化。
//!
//! Logging setup.
//!
//! The library only emits `tracing` events; binaries decide where they go. Call
//! [`init_tracing`] once at startup to print them with the `fmt` subscriber.
//!
//! | Target | Level | Events |
//! |--------|-------|--------|
//! | `study_companion::resilience` | `warn` / `error` | rejections, circuit opened, probe failed |
//! | `study_companion::resilience` | `info` | half-open probe, circuit closed |
//! | `study_companion::assistant` | `warn` | model fallback, degraded retrieval |
//! | `study_companion::middleware` | `debug` | guards passed |
//!
//! `RUST_LOG` overrides the default filter, e.g. `RUST_LOG=study_companion=debug`.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Install a global `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already installed, which makes repeated
/// calls (tests, embedding applications) harmless.
pub fn init_tracing() -> bool {
    init_tracing_with(DEFAULT_FILTER)
}

pub fn init_tracing_with(default_filter: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
