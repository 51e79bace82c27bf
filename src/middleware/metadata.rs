use crate::resilience::rate_limiter::Decision;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Response headers collected while a request is processed.
#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    headers: HeaderMap,
}

impl ResponseMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose the limiter's view of this client's quota. `reset` is whole Unix seconds.
    pub fn record_decision(&mut self, decision: &Decision) {
        self.insert(HEADER_LIMIT, decision.limit.to_string());
        self.insert(HEADER_REMAINING, decision.remaining.to_string());
        self.insert(HEADER_RESET, (decision.reset_at as i64).to_string());
    }

    /// `Retry-After` in whole seconds, rounded up so clients never retry early.
    pub fn set_retry_after(&mut self, secs: f64) {
        let secs = if secs.is_finite() { secs.max(0.0).ceil() as u64 } else { 0 };
        self.insert(HEADER_RETRY_AFTER, secs.to_string());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    fn insert(&mut self, name: &'static str, value: String) {
        // Values are ASCII digits, so conversion cannot fail.
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
    }
}
