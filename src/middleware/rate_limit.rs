use super::{Guard, RequestContext};
use crate::resilience::rate_limiter::RateLimiter;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Admits a request only if the limiter has room for `(client_id, service)`.
///
/// The quota headers are recorded on both outcomes.
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Guard for RateLimitGuard {
    async fn inspect(&self, ctx: &mut RequestContext) -> Result<()> {
        let decision = self.limiter.check(&ctx.client_id, &ctx.service);
        ctx.metadata.record_decision(&decision);
        decision.into_result(&ctx.client_id, &ctx.service)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "rate_limit"
    }
}
