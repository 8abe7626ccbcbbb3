use crate::di::{Scope, ServiceId};
use crate::interceptor::{Interceptor, InterceptorRef, InterceptorResult, Next, RequestContext};
use async_trait::async_trait;
use std::sync::Arc;

/// Result type for Aspect hooks.
pub type AspectResult = anyhow::Result<()>;

/// # Aspect
///
/// Defines cross-cutting concerns with simple `before` and `after` hooks.
/// Aspects are easier to implement than Interceptors when you don't need
/// to control the full execution flow.
///
/// ### Example
///
/// ```rust
/// use modloom::aspect::{Aspect, AspectResult};
/// use modloom::interceptor::RequestContext;
/// use modloom::async_trait;
///
/// pub struct AuditAspect;
///
/// #[async_trait]
/// impl Aspect for AuditAspect {
///     async fn before(&self, context: &RequestContext) -> AspectResult {
///         tracing::info!(unit = %context.id(), "audit: entering");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Aspect: Send + Sync + 'static {
    /// Executed before the rest of the chain.
    async fn before(&self, _context: &RequestContext) -> AspectResult {
        Ok(())
    }

    /// Executed after the rest of the chain succeeded.
    async fn after(&self, _context: &RequestContext) -> AspectResult {
        Ok(())
    }

    /// Executed when the rest of the chain failed. The failure is returned
    /// unchanged afterwards.
    async fn on_error(&self, _context: &RequestContext, _error: &anyhow::Error) {}
}

/// Adapter that wraps an [`Aspect`] to work within the [`Interceptor`] system.
pub struct AspectInterceptor<A: Aspect> {
    aspect: Arc<A>,
}

impl<A: Aspect> AspectInterceptor<A> {
    pub fn new(aspect: Arc<A>) -> Self {
        Self { aspect }
    }
}

#[async_trait]
impl<A: Aspect> Interceptor for AspectInterceptor<A> {
    async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult {
        self.aspect.before(context).await?;

        match next.run(context).await {
            Ok(()) => self.aspect.after(context).await,
            Err(e) => {
                self.aspect.on_error(context, &e).await;
                Err(e)
            }
        }
    }
}

/// Reference an aspect component `A`, resolved per unit of work and run as
/// an interceptor.
pub fn aspect<A: Aspect>() -> InterceptorRef {
    InterceptorRef::from_fn(ServiceId::of::<A>(), |scope: Scope| async move {
        let aspect = scope.resolve::<A>().await?;
        Ok(Arc::new(AspectInterceptor::new(aspect)) as Arc<dyn Interceptor>)
    })
}
