mod compose;
mod context;
mod logging;

pub use compose::{ComposedInterceptor, InterceptorChain, InterceptorRef, compose};
pub use context::RequestContext;
pub use logging::LoggingInterceptor;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Standard return type for interceptors.
///
/// Values produced by the unit of work travel through the context's scope;
/// the chain itself only reports success or failure.
pub type InterceptorResult = anyhow::Result<()>;

type Continuation = Arc<dyn Fn(RequestContext) -> BoxFuture<'static, InterceptorResult> + Send + Sync>;

/// The rest of the chain, as seen by one interceptor.
///
/// `Next` can be run any number of times, including zero.
#[derive(Clone)]
pub struct Next {
    continuation: Continuation,
}

impl Next {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = InterceptorResult> + Send + 'static,
    {
        Self {
            continuation: Arc::new(move |context| f(context).boxed()),
        }
    }

    /// A continuation that does nothing and succeeds.
    pub fn done() -> Self {
        Self::new(|_| async { Ok(()) })
    }

    /// Execute the rest of the chain
    pub async fn run(&self, context: &RequestContext) -> InterceptorResult {
        (self.continuation)(context.clone()).await
    }
}

/// The Interceptor trait
///
/// An interceptor wraps the rest of the chain: it may act before and after
/// calling `next`, skip it to short-circuit the unit of work, call it several
/// times, or catch the failure it returns.
///
/// # Example
/// ```
/// use modloom::interceptor::{Interceptor, InterceptorResult, Next, RequestContext};
/// use modloom::async_trait;
///
/// struct Timing;
///
/// #[async_trait]
/// impl Interceptor for Timing {
///     async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult {
///         let started = std::time::Instant::now();
///         let result = next.run(context).await;
///         println!("took {:?}", started.elapsed());
///         result
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult;
}
