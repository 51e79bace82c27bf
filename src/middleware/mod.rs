//! Guard chain run by the dispatcher before a handler.
//!
//! Each [`Guard`] inspects the request context in order and may short-circuit the
//! request with a structured [`Error`]. Guards may also attach response metadata
//! (rate limit headers) that survives whether the request is rejected or handled.

mod metadata;
mod rate_limit;

pub use metadata::{ResponseMetadata, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER};
pub use rate_limit::RateLimitGuard;

use crate::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Stable client identifier (remote address, user id).
    pub client_id: String,
    /// Service name the request is accounted against.
    pub service: String,
    /// Endpoint name, for logs.
    pub operation: String,
    pub request_id: String,
    pub metadata: ResponseMetadata,
}

impl RequestContext {
    pub fn new(client_id: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            service: service.into(),
            operation: String::new(),
            request_id: uuid::Uuid::new_v4().to_string(),
            metadata: ResponseMetadata::new(),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }
}

#[async_trait]
pub trait Guard: Send + Sync {
    /// Return `Err` to reject the request; the handler will not run.
    async fn inspect(&self, ctx: &mut RequestContext) -> Result<()>;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Result of a request that went through a [`GuardChain`].
#[derive(Debug)]
pub struct Guarded<T> {
    pub result: Result<T>,
    pub metadata: ResponseMetadata,
}

#[derive(Clone, Default)]
pub struct GuardChain {
    guards: Vec<Arc<dyn Guard>>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    pub fn with<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.guards.push(Arc::new(guard));
        self
    }

    pub fn add(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Run every guard in order, then `handler` if none rejected.
    pub async fn execute<T, F, Fut>(&self, mut ctx: RequestContext, handler: F) -> Guarded<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        for guard in &self.guards {
            if let Err(err) = guard.inspect(&mut ctx).await {
                tracing::warn!(
                    guard = guard.name(),
                    client = %ctx.client_id,
                    service = %ctx.service,
                    operation = %ctx.operation,
                    request_id = %ctx.request_id,
                    "request rejected: {}",
                    err
                );
                return finish(ctx, Err(err));
            }
        }
        tracing::debug!(
            operation = %ctx.operation,
            request_id = %ctx.request_id,
            "guards passed"
        );
        let result = handler().await;
        finish(ctx, result)
    }
}

fn finish<T>(mut ctx: RequestContext, result: Result<T>) -> Guarded<T> {
    if let Err(ref err) = result {
        if let Some(secs) = retry_hint(err) {
            ctx.metadata.set_retry_after(secs);
        }
    }
    Guarded {
        result,
        metadata: ctx.metadata,
    }
}

fn retry_hint(err: &Error) -> Option<f64> {
    match err {
        Error::RateLimited(_) | Error::CircuitOpen(_) => err.retry_after(),
        _ => None,
    }
}
