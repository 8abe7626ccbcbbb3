use crate::di::{Scope, ServiceId};
use crate::interceptor::{Interceptor, InterceptorRef, InterceptorResult, Next, RequestContext};
use async_trait::async_trait;
use std::sync::Arc;

/// Standard Result type for Guard
/// Ok(()) means allowed
/// Err(GuardError) means denied
pub type GuardResult = Result<(), GuardError>;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// The Guard trait
/// Implement this to protect a handler
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    async fn can_activate(&self, context: &RequestContext) -> GuardResult;
}

/// Runs a [`Guard`] as an interceptor: a denied unit of work never reaches
/// the rest of the chain.
pub struct GuardInterceptor<G: Guard> {
    guard: Arc<G>,
}

impl<G: Guard> GuardInterceptor<G> {
    pub fn new(guard: Arc<G>) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl<G: Guard> Interceptor for GuardInterceptor<G> {
    async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult {
        if let Err(e) = self.guard.can_activate(context).await {
            tracing::debug!(unit = %context.id(), error = %e, "Guard denied unit of work");
            return Err(e.into());
        }
        next.run(context).await
    }
}

/// Reference a guard component `G`, resolved per unit of work.
pub fn guard<G: Guard>() -> InterceptorRef {
    InterceptorRef::from_fn(ServiceId::of::<G>(), |scope: Scope| async move {
        let guard = scope.resolve::<G>().await?;
        Ok(Arc::new(GuardInterceptor::new(guard)) as Arc<dyn Interceptor>)
    })
}
