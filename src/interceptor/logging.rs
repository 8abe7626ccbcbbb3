use crate::di::{Injectable, Scope};
use crate::error::Result;
use crate::interceptor::{Interceptor, InterceptorResult, Next, RequestContext};
use async_trait::async_trait;
use std::time::Instant;

/// An interceptor that logs unit-of-work timing and outcome
#[derive(Clone, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult {
        let start = Instant::now();
        tracing::info!(unit = %context.id(), "--> unit of work started");

        match next.run(context).await {
            Ok(()) => {
                tracing::info!(unit = %context.id(), elapsed = ?start.elapsed(), "<-- unit of work completed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    unit = %context.id(),
                    elapsed = ?start.elapsed(),
                    error = %e,
                    "<-- unit of work failed"
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Injectable for LoggingInterceptor {
    async fn inject(_scope: &Scope) -> Result<Self> {
        Ok(Self)
    }
}
