//! Sliding-window-log rate limiter keyed by (client identifier, service).
//!
//! Every admitted request leaves its timestamp in the key's log; a request is
//! admitted while fewer than `max_requests` timestamps fall inside the trailing
//! `window_seconds`. Rejections never record anything.

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::{Error, ErrorContext, Result};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

/// Service name whose limit applies to unknown services.
pub const DEFAULT_SERVICE: &str = "general";

const DEFAULT_MAX_KEYS: usize = 100_000;
const DEFAULT_IDLE_TTL_SECS: f64 = 600.0;
const SWEEP_INTERVAL_SECS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceLimit {
    pub max_requests: u32,
    pub window_seconds: f64,
}

impl ServiceLimit {
    pub fn new(max_requests: u32, window_seconds: f64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, 60.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Limit applied to services without an entry in `services`.
    pub default: ServiceLimit,
    pub services: HashMap<String, ServiceLimit>,
    /// Cap on tracked (identifier, service) pairs. A full table only drops pairs whose window
    /// has emptied; new pairs are rejected until one does.
    pub max_keys: usize,
    /// Pairs idle for longer than this (or their window, whichever is larger) are swept.
    pub idle_ttl_seconds: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let services = [
            ("assemblyai", 10),
            ("google_tts", 50),
            ("cohere", 100),
            ("together_ai", 50),
            (DEFAULT_SERVICE, 100),
        ]
        .into_iter()
        .map(|(name, n)| (name.to_string(), ServiceLimit::per_minute(n)))
        .collect();
        Self {
            default: ServiceLimit::per_minute(100),
            services,
            max_keys: DEFAULT_MAX_KEYS,
            idle_ttl_seconds: DEFAULT_IDLE_TTL_SECS,
        }
    }
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration with no per-service entries, only the given default.
    pub fn uniform(default: ServiceLimit) -> Self {
        Self {
            default,
            services: HashMap::new(),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, limit: ServiceLimit) -> Self {
        self.default = limit;
        self
    }

    pub fn with_service(mut self, service: impl Into<String>, limit: ServiceLimit) -> Self {
        self.services.insert(service.into(), limit);
        self
    }

    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn with_idle_ttl(mut self, secs: f64) -> Self {
        self.idle_ttl_seconds = secs;
        self
    }

    pub fn limit_for(&self, service: &str) -> ServiceLimit {
        self.services.get(service).copied().unwrap_or(self.default)
    }

    pub fn validate(&self) -> Result<()> {
        check_window("rate_limits.default", &self.default)?;
        for (name, limit) in &self.services {
            check_window(&format!("rate_limits.services.{}", name), limit)?;
        }
        if self.max_keys == 0 {
            return Err(Error::validation_with_context(
                "max_keys must be at least 1",
                ErrorContext::new()
                    .with_field_path("rate_limits.max_keys")
                    .with_source("rate_limiter"),
            ));
        }
        if !self.idle_ttl_seconds.is_finite() || self.idle_ttl_seconds < 0.0 {
            return Err(Error::validation_with_context(
                "idle_ttl_seconds must be a non-negative number",
                ErrorContext::new()
                    .with_field_path("rate_limits.idle_ttl_seconds")
                    .with_source("rate_limiter"),
            ));
        }
        Ok(())
    }
}

fn check_window(path: &str, limit: &ServiceLimit) -> Result<()> {
    if !limit.window_seconds.is_finite() || limit.window_seconds <= 0.0 {
        return Err(Error::validation_with_context(
            "window_seconds must be a positive number",
            ErrorContext::new()
                .with_field_path(path)
                .with_details(format!("got {}", limit.window_seconds))
                .with_source("rate_limiter"),
        ));
    }
    Ok(())
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Configured `max_requests` for the service.
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Timestamp,
    /// Seconds until a slot frees up; zero when allowed.
    pub retry_after: f64,
}

impl Decision {
    pub fn into_result(
        self,
        identifier: &str,
        service: &str,
    ) -> std::result::Result<Decision, RateLimitExceeded> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimitExceeded {
                identifier: identifier.to_string(),
                service: service.to_string(),
                retry_after: self.retry_after,
                reset_at: self.reset_at,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("rate limit exceeded for {identifier} on {service}, retry after {retry_after:.1}s")]
pub struct RateLimitExceeded {
    pub identifier: String,
    pub service: String,
    pub retry_after: f64,
    pub reset_at: Timestamp,
}

type WindowKey = (String, String);

struct State {
    windows: LruCache<WindowKey, VecDeque<Timestamp>>,
    next_sweep: Timestamp,
}

pub struct RateLimiter {
    cfg: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let cap = NonZeroUsize::new(cfg.max_keys).unwrap_or(NonZeroUsize::MIN);
        let next_sweep = clock.now() + SWEEP_INTERVAL_SECS;
        Self {
            cfg,
            clock,
            state: Mutex::new(State {
                windows: LruCache::new(cap),
                next_sweep,
            }),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    // The critical section never panics midway, so a poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide whether `identifier` may make one more request to `service`, recording it if so.
    pub fn check(&self, identifier: &str, service: &str) -> Decision {
        let limit = self.cfg.limit_for(service);
        let mut st = self.lock();
        let now = self.clock.now();
        if now >= st.next_sweep {
            self.sweep_locked(&mut st, now);
        }

        let key = (identifier.to_string(), service.to_string());
        if !st.windows.contains(&key) && st.windows.len() >= st.windows.cap().get() {
            if let Err(reset_at) = self.make_room(&mut st, now) {
                tracing::warn!(identifier, service, reset_at, "rate limiter key table full");
                return Decision {
                    allowed: false,
                    limit: limit.max_requests,
                    remaining: 0,
                    reset_at,
                    retry_after: (reset_at - now).max(0.0),
                };
            }
        }
        let timestamps = st.windows.get_or_insert_mut(key, VecDeque::new);

        // Keep the log ordered even if the wall clock steps backwards.
        let now = timestamps.back().map_or(now, |&last| now.max(last));
        let cutoff = now - limit.window_seconds;
        while timestamps.front().is_some_and(|&t| t <= cutoff) {
            timestamps.pop_front();
        }

        if timestamps.len() >= limit.max_requests as usize {
            let reset_at = timestamps
                .front()
                .map_or(now + limit.window_seconds, |&oldest| oldest + limit.window_seconds);
            tracing::debug!(identifier, service, reset_at, "rate limit reached");
            return Decision {
                allowed: false,
                limit: limit.max_requests,
                remaining: 0,
                reset_at,
                retry_after: (reset_at - now).max(0.0),
            };
        }

        timestamps.push_back(now);
        Decision {
            allowed: true,
            limit: limit.max_requests,
            remaining: limit.max_requests - timestamps.len() as u32,
            reset_at: now + limit.window_seconds,
            retry_after: 0.0,
        }
    }

    /// What [`check`](Self::check) would answer right now, without recording a request.
    pub fn snapshot(&self, identifier: &str, service: &str) -> Decision {
        let limit = self.cfg.limit_for(service);
        let st = self.lock();
        let now = self.clock.now();
        let cutoff = now - limit.window_seconds;
        let key = (identifier.to_string(), service.to_string());
        let live: Vec<Timestamp> = st
            .windows
            .peek(&key)
            .map(|ts| ts.iter().copied().filter(|&t| t > cutoff).collect())
            .unwrap_or_default();
        let used = live.len().min(u32::MAX as usize) as u32;
        if used >= limit.max_requests {
            let reset_at = live
                .first()
                .map_or(now + limit.window_seconds, |&oldest| oldest + limit.window_seconds);
            Decision {
                allowed: false,
                limit: limit.max_requests,
                remaining: 0,
                reset_at,
                retry_after: (reset_at - now).max(0.0),
            }
        } else {
            Decision {
                allowed: true,
                limit: limit.max_requests,
                remaining: limit.max_requests - used,
                reset_at: now + limit.window_seconds,
                retry_after: 0.0,
            }
        }
    }

    /// Forget the history of one (identifier, service) pair.
    pub fn reset(&self, identifier: &str, service: &str) {
        let key = (identifier.to_string(), service.to_string());
        self.lock().windows.pop(&key);
    }

    /// Drop idle pairs now instead of waiting for the periodic sweep. Returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        let mut st = self.lock();
        let now = self.clock.now();
        self.sweep_locked(&mut st, now)
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().windows.len()
    }

    /// Free one slot in a full key table by dropping pairs with nothing left in their window.
    /// Pairs with live requests are never dropped; when all are live, returns the time the
    /// first of them goes quiet.
    fn make_room(&self, st: &mut State, now: Timestamp) -> std::result::Result<(), Timestamp> {
        let mut quiet_at = f64::INFINITY;
        let expired: Vec<WindowKey> = st
            .windows
            .iter()
            .filter(|((_, service), ts)| {
                let window = self.cfg.limit_for(service).window_seconds;
                match ts.back() {
                    Some(&last) if last > now - window => {
                        quiet_at = quiet_at.min(last + window);
                        false
                    }
                    _ => true,
                }
            })
            .map(|(k, _)| k.clone())
            .collect();
        if expired.is_empty() {
            return Err(quiet_at);
        }
        for key in &expired {
            st.windows.pop(key);
        }
        tracing::debug!(dropped = expired.len(), "dropped expired rate limit windows");
        Ok(())
    }

    fn sweep_locked(&self, st: &mut State, now: Timestamp) -> usize {
        let stale: Vec<WindowKey> = st
            .windows
            .iter()
            .filter(|((_, service), ts)| {
                let ttl = self
                    .cfg
                    .idle_ttl_seconds
                    .max(self.cfg.limit_for(service).window_seconds);
                ts.back().map_or(true, |&last| now - last > ttl)
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            st.windows.pop(key);
        }
        st.next_sweep = now + SWEEP_INTERVAL_SECS;
        if !stale.is_empty() {
            tracing::debug!(dropped = stale.len(), "swept idle rate limit windows");
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: ServiceLimit, clock: &Arc<ManualClock>) -> RateLimiter {
        RateLimiter::with_clock(
            RateLimiterConfig::uniform(limit),
            clock.clone() as Arc<dyn Clock>,
        )
    }

    #[test]
    fn test_two_per_minute_scenario() {
        let clock = Arc::new(ManualClock::new(0.0));
        let rl = limiter(ServiceLimit::new(2, 60.0), &clock);

        let d = rl.check("client", "general");
        assert!(d.allowed);
        assert_eq!(d.remaining, 1);
        assert_eq!(d.reset_at, 60.0);
        assert_eq!(d.retry_after, 0.0);

        clock.set(1.0);
        let d = rl.check("client", "general");
        assert!(d.allowed);
        assert_eq!(d.remaining, 0);

        clock.set(2.0);
        let d = rl.check("client", "general");
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.reset_at, 60.0);
        assert_eq!(d.retry_after, 58.0);

        clock.set(61.0);
        let d = rl.check("client", "general");
        assert!(d.allowed, "oldest request at t=0 has expired");
        // t=1 is exactly one window old at t=61 and is evicted too.
        assert_eq!(d.remaining, 1);
    }

    #[test]
    fn test_boundary_is_exact() {
        let clock = Arc::new(ManualClock::new(10.0));
        let rl = limiter(ServiceLimit::new(1, 5.0), &clock);
        assert!(rl.check("a", "s").allowed);

        clock.set(14.5);
        let rejected = rl.check("a", "s");
        assert!(!rejected.allowed);
        assert_eq!(rejected.reset_at, 15.0);

        // A timestamp exactly `window` old is evicted.
        clock.set(rejected.reset_at);
        assert!(rl.check("a", "s").allowed);
    }

    #[test]
    fn test_same_instant_calls_take_distinct_slots() {
        let clock = Arc::new(ManualClock::new(100.0));
        let rl = limiter(ServiceLimit::new(3, 1.0), &clock);
        let remaining: Vec<u32> = (0..3).map(|_| rl.check("a", "s").remaining).collect();
        assert_eq!(remaining, vec![2, 1, 0]);
        assert!(!rl.check("a", "s").allowed);
    }

    #[test]
    fn test_zero_max_requests_always_rejects() {
        let clock = Arc::new(ManualClock::new(0.0));
        let rl = limiter(ServiceLimit::new(0, 30.0), &clock);
        for step in 0..3 {
            clock.set(step as f64 * 100.0);
            let d = rl.check("a", "s");
            assert!(!d.allowed);
            assert_eq!(d.retry_after, 30.0);
        }
    }

    #[test]
    fn test_unknown_service_uses_default() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cfg = RateLimiterConfig::uniform(ServiceLimit::new(1, 60.0))
            .with_service("assemblyai", ServiceLimit::new(3, 60.0));
        let rl = RateLimiter::with_clock(cfg, clock.clone() as Arc<dyn Clock>);
        assert_eq!(rl.check("a", "assemblyai").remaining, 2);
        assert_eq!(rl.check("a", "mystery").limit, 1);
        assert!(!rl.check("a", "mystery").allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = Arc::new(ManualClock::new(0.0));
        let rl = limiter(ServiceLimit::new(1, 60.0), &clock);
        assert!(rl.check("a", "s1").allowed);
        assert!(rl.check("a", "s2").allowed);
        assert!(rl.check("b", "s1").allowed);
        assert!(!rl.check("a", "s1").allowed);
    }

    #[test]
    fn test_snapshot_does_not_record() {
        let clock = Arc::new(ManualClock::new(0.0));
        let rl = limiter(ServiceLimit::new(2, 60.0), &clock);
        rl.check("a", "s");
        let snap = rl.snapshot("a", "s");
        assert!(snap.allowed);
        assert_eq!(snap.remaining, 1);
        assert_eq!(rl.snapshot("a", "s").remaining, 1);
        assert_eq!(rl.check("a", "s").remaining, 0);
        assert!(!rl.snapshot("a", "s").allowed);
    }

    #[test]
    fn test_reset_clears_history() {
        let clock = Arc::new(ManualClock::new(0.0));
        let rl = limiter(ServiceLimit::new(1, 60.0), &clock);
        rl.check("a", "s");
        assert!(!rl.check("a", "s").allowed);
        rl.reset("a", "s");
        assert!(rl.check("a", "s").allowed);
    }

    #[test]
    fn test_idle_keys_are_swept() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cfg = RateLimiterConfig::uniform(ServiceLimit::new(5, 10.0)).with_idle_ttl(20.0);
        let rl = RateLimiter::with_clock(cfg, clock.clone() as Arc<dyn Clock>);
        rl.check("a", "s");
        clock.set(15.0);
        rl.check("b", "s");
        assert_eq!(rl.tracked_keys(), 2);

        clock.set(25.0);
        assert_eq!(rl.sweep_idle(), 1);
        assert_eq!(rl.tracked_keys(), 1);
    }

    #[test]
    fn test_periodic_sweep_runs_during_check() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cfg = RateLimiterConfig::uniform(ServiceLimit::new(5, 1.0)).with_idle_ttl(0.0);
        let rl = RateLimiter::with_clock(cfg, clock.clone() as Arc<dyn Clock>);
        for i in 0..10 {
            rl.check(&format!("client-{}", i), "s");
        }
        clock.set(SWEEP_INTERVAL_SECS + 1.0);
        rl.check("fresh", "s");
        assert_eq!(rl.tracked_keys(), 1);
    }

    #[test]
    fn test_full_key_table_keeps_live_windows() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cfg = RateLimiterConfig::uniform(ServiceLimit::new(1, 60.0)).with_max_keys(2);
        let rl = RateLimiter::with_clock(cfg, clock.clone() as Arc<dyn Clock>);
        assert!(rl.check("victim", "s").allowed);
        assert!(rl.check("x1", "s").allowed);

        clock.set(10.0);
        let flooded = rl.check("x2", "s");
        assert!(!flooded.allowed);
        assert_eq!(flooded.reset_at, 60.0);
        assert_eq!(flooded.retry_after, 50.0);
        assert_eq!(rl.tracked_keys(), 2);
        assert!(!rl.check("victim", "s").allowed, "victim admitted twice in one window");
    }

    #[test]
    fn test_full_key_table_drops_expired_windows() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cfg = RateLimiterConfig::uniform(ServiceLimit::new(1, 60.0)).with_max_keys(2);
        let rl = RateLimiter::with_clock(cfg, clock.clone() as Arc<dyn Clock>);
        rl.check("a", "s");
        clock.set(30.0);
        rl.check("b", "s");

        clock.set(61.0);
        assert!(rl.check("c", "s").allowed);
        assert_eq!(rl.tracked_keys(), 2);
        assert!(!rl.check("b", "s").allowed);
    }

    #[test]
    fn test_clock_stepping_back_keeps_order() {
        let clock = Arc::new(ManualClock::new(50.0));
        let rl = limiter(ServiceLimit::new(2, 10.0), &clock);
        rl.check("a", "s");
        clock.set(40.0);
        let d = rl.check("a", "s");
        assert!(d.allowed);
        assert_eq!(d.reset_at, 60.0);
        let rejected = rl.check("a", "s");
        assert!(rejected.retry_after >= 0.0);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_limit() {
        let clock = Arc::new(ManualClock::new(0.0));
        let rl = Arc::new(limiter(ServiceLimit::new(25, 60.0), &clock));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || (0..10).filter(|_| rl.check("shared", "s").allowed).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 25);
    }

    #[test]
    fn test_rejection_converts_to_error() {
        let clock = Arc::new(ManualClock::new(0.0));
        let rl = limiter(ServiceLimit::new(0, 60.0), &clock);
        let err = rl.check("10.0.0.1", "cohere").into_result("10.0.0.1", "cohere").unwrap_err();
        assert_eq!(err.service, "cohere");
        assert_eq!(err.retry_after, 60.0);
        assert!(err.to_string().contains("10.0.0.1"));
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimiterConfig::default().validate().is_ok());
        assert!(RateLimiterConfig::uniform(ServiceLimit::new(1, -1.0)).validate().is_err());
        assert!(RateLimiterConfig::uniform(ServiceLimit::new(1, f64::NAN)).validate().is_err());
        assert!(RateLimiterConfig::default().with_max_keys(0).validate().is_err());
        assert!(RateLimiterConfig::default().with_idle_ttl(-5.0).validate().is_err());
    }
}
