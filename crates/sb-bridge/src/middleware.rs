use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, debug_span, Instrument};

use crate::error::Result;
use crate::gateway::{Middleware, Next, RequestContext};

/// Wraps every message in a debug span and logs how long it took.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(&self, ctx: &RequestContext, next: Next<'_>) -> Result<()> {
        let span = debug_span!("message", client_id = %ctx.client.id(), kind = %ctx.kind);
        let started = Instant::now();
        let result = next.run(ctx).instrument(span).await;
        debug!(
            kind = %ctx.kind,
            elapsed_us = started.elapsed().as_micros() as u64,
            ok = result.is_ok(),
            "message handled"
        );
        result
    }
}
