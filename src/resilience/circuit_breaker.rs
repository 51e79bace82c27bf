//! Per-service circuit breaker.
//!
//! - **Closed**: calls pass through; every failure is counted and the circuit opens
//!   once the count reaches `failure_threshold`.
//! - **Open**: calls fail fast with [`CircuitOpenError`] until `timeout_seconds`
//!   have passed since the last failure.
//! - **Half-open**: exactly one probe call runs. Success closes the circuit and
//!   clears the count, failure re-opens it and re-arms the timeout.

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

/// Retry hint handed to callers turned away while a half-open probe is running.
pub const PROBE_RETRY_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub timeout_seconds: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_seconds: 60.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    #[serde(flatten)]
    pub defaults: BreakerSettings,
    /// Per-service replacements for `defaults`.
    pub overrides: HashMap<String, BreakerSettings>,
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.defaults.failure_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.defaults.timeout_seconds = secs;
        self
    }

    pub fn with_override(mut self, service: impl Into<String>, settings: BreakerSettings) -> Self {
        self.overrides.insert(service.into(), settings);
        self
    }

    pub fn settings_for(&self, service: &str) -> BreakerSettings {
        self.overrides.get(service).copied().unwrap_or(self.defaults)
    }

    pub fn validate(&self) -> Result<()> {
        let all = std::iter::once(("circuit_breaker".to_string(), &self.defaults)).chain(
            self.overrides
                .iter()
                .map(|(name, s)| (format!("circuit_breaker.overrides.{}", name), s)),
        );
        for (path, settings) in all {
            if settings.failure_threshold == 0 {
                return Err(Error::validation_with_context(
                    "failure_threshold must be at least 1",
                    ErrorContext::new()
                        .with_field_path(format!("{}.failure_threshold", path))
                        .with_source("circuit_breaker"),
                ));
            }
            if !settings.timeout_seconds.is_finite() || settings.timeout_seconds < 0.0 {
                return Err(Error::validation_with_context(
                    "timeout_seconds must be a non-negative number",
                    ErrorContext::new()
                        .with_field_path(format!("{}.timeout_seconds", path))
                        .with_source("circuit_breaker"),
                ));
            }
        }
        Ok(())
    }
}

/// The breaker refused the call; the wrapped operation never ran.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("circuit breaker is open for {service}")]
pub struct CircuitOpenError {
    pub service: String,
    /// Seconds until the breaker will admit a probe, if known.
    pub retry_after: Option<f64>,
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    #[error(transparent)]
    Open(CircuitOpenError),
    #[error("{0}")]
    Upstream(E),
}

impl<E> GuardError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, GuardError::Open(_))
    }

    pub fn into_upstream(self) -> Option<E> {
        match self {
            GuardError::Upstream(e) => Some(e),
            GuardError::Open(_) => None,
        }
    }
}

impl From<GuardError<Error>> for Error {
    fn from(err: GuardError<Error>) -> Self {
        match err {
            GuardError::Open(open) => Error::CircuitOpen(open),
            GuardError::Upstream(e) => e,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<Timestamp>,
    pub failure_threshold: u32,
    pub timeout_seconds: f64,
    /// Seconds left before a probe is admitted, if currently open.
    pub open_remaining: Option<f64>,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Timestamp>,
    probe_in_flight: bool,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            probe_in_flight: false,
        }
    }
}

pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `operation` under the breaker for `service`.
    ///
    /// The lock is released while the operation runs; only the admission decision and
    /// the bookkeeping afterwards are critical sections.
    pub async fn guard<T, E, F, Fut>(
        &self,
        service: &str,
        operation: F,
    ) -> std::result::Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let permit = self.acquire(service).map_err(GuardError::Open)?;
        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail();
                Err(GuardError::Upstream(e))
            }
        }
    }

    /// Blocking counterpart of [`guard`](Self::guard) for synchronous calls.
    pub fn guard_blocking<T, E, F>(
        &self,
        service: &str,
        operation: F,
    ) -> std::result::Result<T, GuardError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let permit = self.acquire(service).map_err(GuardError::Open)?;
        match operation() {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(e) => {
                permit.fail();
                Err(GuardError::Upstream(e))
            }
        }
    }

    fn acquire<'a>(&'a self, service: &'a str) -> std::result::Result<Permit<'a>, CircuitOpenError> {
        let settings = self.cfg.settings_for(service);
        let mut circuits = self.lock();
        let now = self.clock.now();
        let circuit = circuits.entry(service.to_string()).or_default();

        match circuit.state {
            CircuitState::Closed => Ok(Permit::new(self, service, false)),
            CircuitState::Open => {
                let last = circuit.last_failure_time.unwrap_or(now);
                if now - last > settings.timeout_seconds {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    tracing::info!(service, "circuit breaker moving to half-open state");
                    Ok(Permit::new(self, service, true))
                } else {
                    tracing::debug!(service, "circuit breaker open, rejecting call");
                    Err(CircuitOpenError {
                        service: service.to_string(),
                        retry_after: Some((last + settings.timeout_seconds - now).max(0.0)),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    Err(CircuitOpenError {
                        service: service.to_string(),
                        retry_after: Some(PROBE_RETRY_SECS),
                    })
                } else {
                    circuit.probe_in_flight = true;
                    Ok(Permit::new(self, service, true))
                }
            }
        }
    }

    fn on_success(&self, service: &str, probe: bool) {
        let mut circuits = self.lock();
        let circuit = circuits.entry(service.to_string()).or_default();
        if probe && circuit.state == CircuitState::HalfOpen {
            circuit.failure_count = 0;
            circuit.state = CircuitState::Closed;
            circuit.probe_in_flight = false;
            tracing::info!(service, "circuit breaker closed, service recovered");
        }
    }

    fn on_failure(&self, service: &str, probe: bool) {
        let settings = self.cfg.settings_for(service);
        let mut circuits = self.lock();
        let now = self.clock.now();
        let circuit = circuits.entry(service.to_string()).or_default();
        circuit.failure_count = circuit.failure_count.saturating_add(1);
        circuit.last_failure_time = Some(now);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failure_count >= settings.failure_threshold {
                    circuit.state = CircuitState::Open;
                    tracing::error!(
                        service,
                        failures = circuit.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if probe => {
                circuit.state = CircuitState::Open;
                circuit.probe_in_flight = false;
                tracing::warn!(service, "probe failed, circuit breaker re-opened");
            }
            // Late results from calls admitted earlier only re-arm the timeout.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    pub fn state(&self, service: &str) -> CircuitState {
        self.lock()
            .get(service)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    pub fn snapshot(&self, service: &str) -> CircuitSnapshot {
        let settings = self.cfg.settings_for(service);
        let now = self.clock.now();
        let circuits = self.lock();
        let (state, failure_count, last_failure_time) = circuits
            .get(service)
            .map_or((CircuitState::Closed, 0, None), |c| {
                (c.state, c.failure_count, c.last_failure_time)
            });
        let open_remaining = match (state, last_failure_time) {
            (CircuitState::Open, Some(last)) => {
                Some((last + settings.timeout_seconds - now).max(0.0))
            }
            _ => None,
        };
        CircuitSnapshot {
            service: service.to_string(),
            state,
            failure_count,
            last_failure_time,
            failure_threshold: settings.failure_threshold,
            timeout_seconds: settings.timeout_seconds,
            open_remaining,
        }
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names.iter().map(|name| self.snapshot(name)).collect()
    }

    /// Force `service` back to a fresh closed circuit.
    pub fn reset(&self, service: &str) {
        self.lock().remove(service);
    }
}

/// Admission ticket for one guarded call.
///
/// A probe permit dropped without an outcome (cancelled future, panic) counts as a
/// failed probe so the circuit cannot stay half-open forever.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    service: &'a str,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, service: &'a str, probe: bool) -> Self {
        Self {
            breaker,
            service,
            probe,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.service, self.probe);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.service, self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.on_failure(self.service, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, timeout: f64, clock: &Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::with_clock(
            CircuitBreakerConfig::new()
                .with_failure_threshold(threshold)
                .with_timeout(timeout),
            clock.clone() as Arc<dyn Clock>,
        )
    }

    fn fail() -> std::result::Result<(), String> {
        Err("boom".to_string())
    }

    #[test]
    fn test_config_defaults() {
        let cfg = CircuitBreakerConfig::default();
        assert_eq!(cfg.defaults.failure_threshold, 5);
        assert_eq!(cfg.defaults.timeout_seconds, 60.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_overrides() {
        let cfg = CircuitBreakerConfig::new().with_override(
            "assemblyai",
            BreakerSettings {
                failure_threshold: 1,
                timeout_seconds: 5.0,
            },
        );
        assert_eq!(cfg.settings_for("assemblyai").failure_threshold, 1);
        assert_eq!(cfg.settings_for("cohere").failure_threshold, 5);
    }

    #[test]
    fn test_opens_after_threshold_without_running_operation() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(3, 30.0, &clock);
        let calls = AtomicU32::new(0);
        let op = || {
            calls.fetch_add(1, Ordering::SeqCst);
            fail()
        };

        for _ in 0..3 {
            assert!(matches!(cb.guard_blocking("svc", op), Err(GuardError::Upstream(_))));
        }
        assert_eq!(cb.state("svc"), CircuitState::Open);

        let err = cb.guard_blocking("svc", op).unwrap_err();
        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_success_in_closed_state_keeps_count() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(3, 30.0, &clock);
        let _ = cb.guard_blocking("svc", fail);
        cb.guard_blocking::<_, String, _>("svc", || Ok(())).unwrap();
        assert_eq!(cb.snapshot("svc").failure_count, 1);
        assert_eq!(cb.state("svc"), CircuitState::Closed);
    }

    #[test]
    fn test_two_failure_scenario() {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let cb = breaker(2, 30.0, &clock);
        let _ = cb.guard_blocking("svc", fail);
        let _ = cb.guard_blocking("svc", fail);
        assert_eq!(cb.state("svc"), CircuitState::Open);

        clock.advance(10.0);
        let err = cb.guard_blocking::<(), String, _>("svc", || Ok(())).unwrap_err();
        match err {
            GuardError::Open(open) => {
                assert_eq!(open.service, "svc");
                assert_eq!(open.retry_after, Some(20.0));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }

        clock.advance(21.0);
        cb.guard_blocking::<_, String, _>("svc", || Ok("answer")).unwrap();
        let snap = cb.snapshot("svc");
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[test]
    fn test_timeout_must_be_strictly_exceeded() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(1, 30.0, &clock);
        let _ = cb.guard_blocking("svc", fail);
        clock.set(30.0);
        assert!(cb.guard_blocking("svc", fail).unwrap_err().is_open());
        clock.set(30.001);
        assert!(!cb.guard_blocking("svc", fail).unwrap_err().is_open());
    }

    #[test]
    fn test_failed_probe_rearms_timeout() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(1, 30.0, &clock);
        let _ = cb.guard_blocking("svc", fail);

        clock.set(31.0);
        assert!(matches!(cb.guard_blocking("svc", fail), Err(GuardError::Upstream(_))));
        let snap = cb.snapshot("svc");
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failure_count, 2);
        assert_eq!(snap.last_failure_time, Some(31.0));

        clock.set(45.0);
        assert!(cb.guard_blocking("svc", fail).unwrap_err().is_open());
        clock.set(61.5);
        assert!(cb.guard_blocking::<_, String, _>("svc", || Ok(())).is_ok());
        assert_eq!(cb.state("svc"), CircuitState::Closed);
    }

    #[test]
    fn test_upstream_error_is_returned_unchanged() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(5, 30.0, &clock);
        let err = cb
            .guard_blocking::<(), _, _>("svc", || Err(Error::upstream("svc", "HTTP 500")))
            .unwrap_err();
        assert!(!err.is_open());
        let err = err.into_upstream().expect("upstream error");
        assert!(matches!(err, Error::Upstream { ref message, .. } if message == "HTTP 500"));
    }

    #[test]
    fn test_open_rejection_has_no_upstream_error() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(1, 30.0, &clock);
        let _ = cb.guard_blocking("svc", fail);
        let err = cb.guard_blocking("svc", || Ok::<_, String>(())).unwrap_err();
        assert!(err.into_upstream().is_none());
    }

    #[test]
    fn test_services_are_isolated() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(1, 30.0, &clock);
        let _ = cb.guard_blocking("a", fail);
        assert_eq!(cb.state("a"), CircuitState::Open);
        assert_eq!(cb.state("b"), CircuitState::Closed);
        assert!(cb.guard_blocking::<_, String, _>("b", || Ok(())).is_ok());
    }

    #[test]
    fn test_reset_closes_circuit() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(1, 30.0, &clock);
        let _ = cb.guard_blocking("a", fail);
        cb.reset("a");
        assert_eq!(cb.state("a"), CircuitState::Closed);
        assert_eq!(cb.snapshot("a").failure_count, 0);
    }

    #[test]
    fn test_snapshot_reports_remaining_open_time() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(1, 30.0, &clock);
        let _ = cb.guard_blocking("a", fail);
        clock.set(12.0);
        let snap = cb.snapshot("a");
        assert_eq!(snap.open_remaining, Some(18.0));
        assert_eq!(cb.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_half_open_admits_single_probe() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = Arc::new(breaker(1, 30.0, &clock));
        let _ = cb.guard_blocking("svc", fail);
        clock.set(31.0);

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let cb = Arc::clone(&cb);
            tokio::spawn(async move {
                cb.guard("svc", || async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok::<_, String>("probe")
                })
                .await
            })
        };

        started_rx.await.unwrap();
        assert_eq!(cb.state("svc"), CircuitState::HalfOpen);
        let second = cb.guard("svc", || async { Ok::<_, String>("second") }).await;
        match second {
            Err(GuardError::Open(e)) => assert_eq!(e.retry_after, Some(PROBE_RETRY_SECS)),
            other => panic!("expected CircuitOpenError, got {other:?}"),
        }

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), "probe");
        assert_eq!(cb.state("svc"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_probe_reopens_circuit() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = breaker(1, 30.0, &clock);
        let _ = cb.guard_blocking("svc", fail);
        clock.set(31.0);

        let pending = cb.guard("svc", || futures::future::pending::<std::result::Result<(), String>>());
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;
        assert!(timed_out.is_err());

        let snap = cb.snapshot("svc");
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.last_failure_time, Some(31.0));
    }

    #[test]
    fn test_concurrent_failures_are_all_counted() {
        let clock = Arc::new(ManualClock::new(0.0));
        let cb = Arc::new(breaker(1_000, 30.0, &clock));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        let _ = cb.guard_blocking("svc", fail);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.snapshot("svc").failure_count, 50);
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::new().with_failure_threshold(0).validate().is_err());
        assert!(CircuitBreakerConfig::new().with_timeout(f64::INFINITY).validate().is_err());
        let bad_override = CircuitBreakerConfig::new().with_override(
            "x",
            BreakerSettings {
                failure_threshold: 0,
                timeout_seconds: 1.0,
            },
        );
        let err = bad_override.validate().unwrap_err();
        assert!(err.to_string().contains("circuit_breaker.overrides.x"));
    }
}
