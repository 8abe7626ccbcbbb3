//! Handler registration surface for transports.
//!
//! A transport (HTTP server, message consumer, the event bus) supplies an
//! interceptor chain and a terminal action per route or topic, and gets back
//! an [`EntryPoint`]. Each call to [`EntryPoint::dispatch`] is one unit of
//! work: a fresh child scope, a [`RequestContext`] bound into it, the
//! composed chain, and disposal of the scope however the chain ends.

use crate::di::{Constraint, Scope, ServiceId};
use crate::error::Result;
use crate::interceptor::{
    ComposedInterceptor, InterceptorChain, InterceptorResult, Next, RequestContext,
};
use crate::method::Method;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Clone)]
pub struct EntryPoint {
    root: Scope,
    name: Arc<str>,
    interceptor: ComposedInterceptor,
    terminal: Next,
}

impl EntryPoint {
    /// Compose `chain` around `terminal`. Every interceptor must already be
    /// bound somewhere visible from `root`.
    pub fn new(
        root: &Scope,
        name: impl Into<String>,
        chain: &InterceptorChain,
        terminal: Next,
    ) -> Result<Self> {
        let interceptor = chain.compose();
        interceptor.validate(root)?;
        Ok(Self {
            root: root.clone(),
            name: Arc::from(name.into()),
            interceptor,
            terminal,
        })
    }

    /// Use `method` on the component bound under `target` as the terminal
    /// action. The component and the method's parameters are resolved from
    /// the unit of work's scope.
    pub fn for_method<T: Send + Sync + 'static>(
        root: &Scope,
        chain: &InterceptorChain,
        target: ServiceId,
        method: Method<T, ()>,
    ) -> Result<Self> {
        method.validate()?;
        let name = format!("{target}::{}", method.name());
        let terminal = Next::new(move |context: RequestContext| {
            let method = method.clone();
            let target = target.clone();
            async move {
                let instance = context
                    .scope()
                    .resolve_as::<T>(&target, &Constraint::default())
                    .await?;
                method.invoke(context.scope(), instance).await
            }
        });
        Self::new(root, name, chain, terminal)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one unit of work. `seed` binds the transport's own context values
    /// into the fresh scope before the chain starts.
    pub async fn dispatch<F>(&self, seed: F) -> InterceptorResult
    where
        F: FnOnce(&RequestContext) -> Result<()>,
    {
        let scope = UnitScope(self.root.child());
        let span = tracing::info_span!("unit_of_work", id = %scope.0.id(), handler = %self.name);

        async {
            let context = RequestContext::new(scope.0.clone())?;
            seed(&context)?;
            self.interceptor
                .run(&context, self.terminal.clone())
                .await
        }
        .instrument(span)
        .await
    }
}

/// Disposes the unit of work's scope when dispatch ends, including when the
/// dispatch future is dropped mid-flight.
struct UnitScope(Scope);

impl Drop for UnitScope {
    fn drop(&mut self) {
        self.0.dispose();
    }
}

impl std::fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryPoint")
            .field("name", &self.name)
            .field("interceptors", &self.interceptor.len())
            .finish()
    }
}
