use super::{Interceptor, InterceptorResult, Next, RequestContext};
use crate::di::{Constraint, Scope, ServiceId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

type Resolver = Arc<dyn Fn(Scope) -> BoxFuture<'static, Result<Arc<dyn Interceptor>>> + Send + Sync>;

/// Names an interceptor to be resolved from the unit of work's scope.
#[derive(Clone)]
pub struct InterceptorRef {
    id: ServiceId,
    resolve: Resolver,
}

impl InterceptorRef {
    /// An interceptor component bound under its own type.
    pub fn of<T: Interceptor>() -> Self {
        Self::from_fn(ServiceId::of::<T>(), |scope: Scope| async move {
            let interceptor = scope.resolve::<T>().await?;
            Ok(interceptor as Arc<dyn Interceptor>)
        })
    }

    /// An interceptor bound as `Arc<dyn Interceptor>` under `id`.
    pub fn keyed(id: impl Into<ServiceId>) -> Self {
        let id = id.into();
        let key = id.clone();
        Self::from_fn(id, move |scope: Scope| {
            let key = key.clone();
            async move {
                scope
                    .resolve_trait_as::<dyn Interceptor>(&key, &Constraint::default())
                    .await
            }
        })
    }

    /// An interceptor built from the component bound under `id`, which must
    /// be visible from the scope the chain is validated against.
    pub fn from_fn<F, Fut>(id: ServiceId, resolve: F) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn Interceptor>>> + Send + 'static,
    {
        Self {
            id,
            resolve: Arc::new(move |scope| resolve(scope).boxed()),
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.id
    }

    async fn resolve(&self, scope: &Scope) -> Result<Arc<dyn Interceptor>> {
        (self.resolve)(scope.clone()).await
    }
}

impl std::fmt::Debug for InterceptorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InterceptorRef").field(&self.id).finish()
    }
}

/// Interceptors collected from the three declaration levels.
///
/// Global interceptors always wrap group (controller) interceptors, which
/// always wrap handler interceptors.
#[derive(Clone, Debug, Default)]
pub struct InterceptorChain {
    global: Vec<InterceptorRef>,
    group: Vec<InterceptorRef>,
    handler: Vec<InterceptorRef>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, interceptor: InterceptorRef) -> Self {
        self.global.push(interceptor);
        self
    }

    pub fn group(mut self, interceptor: InterceptorRef) -> Self {
        self.group.push(interceptor);
        self
    }

    pub fn handler(mut self, interceptor: InterceptorRef) -> Self {
        self.handler.push(interceptor);
        self
    }

    pub fn extend_global(mut self, interceptors: impl IntoIterator<Item = InterceptorRef>) -> Self {
        self.global.extend(interceptors);
        self
    }

    pub fn extend_group(mut self, interceptors: impl IntoIterator<Item = InterceptorRef>) -> Self {
        self.group.extend(interceptors);
        self
    }

    pub fn extend_handler(mut self, interceptors: impl IntoIterator<Item = InterceptorRef>) -> Self {
        self.handler.extend(interceptors);
        self
    }

    /// Outermost first.
    pub fn iter(&self) -> impl Iterator<Item = &InterceptorRef> {
        self.global
            .iter()
            .chain(&self.group)
            .chain(&self.handler)
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.group.len() + self.handler.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn compose(&self) -> ComposedInterceptor {
        compose(self.iter().cloned())
    }
}

/// One handler running a fixed list of interceptors in onion order.
#[derive(Clone, Debug)]
pub struct ComposedInterceptor {
    interceptors: Arc<[InterceptorRef]>,
}

/// Compose `interceptors`, outermost first.
pub fn compose(interceptors: impl IntoIterator<Item = InterceptorRef>) -> ComposedInterceptor {
    ComposedInterceptor {
        interceptors: interceptors.into_iter().collect(),
    }
}

impl ComposedInterceptor {
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Check that every interceptor is bound somewhere visible from `scope`.
    pub fn validate(&self, scope: &Scope) -> Result<()> {
        match self.interceptors.iter().find(|i| !scope.contains(i.service_id())) {
            Some(missing) => Err(Error::resolution(
                missing.service_id(),
                "interceptor is not bound",
            )),
            None => Ok(()),
        }
    }

    /// Resolve every interceptor from the context's scope, then run them
    /// around `terminal`.
    pub async fn run(&self, context: &RequestContext, terminal: Next) -> InterceptorResult {
        let mut resolved = Vec::with_capacity(self.interceptors.len());
        for interceptor in self.interceptors.iter() {
            resolved.push(interceptor.resolve(context.scope()).await?);
        }

        // Fold right to left: each link owns the rest of the chain.
        let mut next = terminal;
        for interceptor in resolved.into_iter().rev() {
            let inner = next;
            next = Next::new(move |context: RequestContext| {
                let interceptor = Arc::clone(&interceptor);
                let inner = inner.clone();
                async move { interceptor.intercept(&context, inner).await }
            });
        }
        next.run(context).await
    }
}

#[async_trait]
impl Interceptor for ComposedInterceptor {
    async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult {
        self.run(context, next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{ComponentDescriptor, Scope};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Journal = Arc<Mutex<Vec<String>>>;

    enum Behavior {
        Pass,
        ShortCircuit,
        Twice,
        Recover,
    }

    struct Recording {
        label: &'static str,
        behavior: Behavior,
        journal: Journal,
    }

    #[async_trait]
    impl Interceptor for Recording {
        async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult {
            self.log(format!("{} before", self.label));
            let result = match self.behavior {
                Behavior::Pass => next.run(context).await,
                Behavior::ShortCircuit => Ok(()),
                Behavior::Twice => {
                    next.run(context).await?;
                    next.run(context).await
                }
                Behavior::Recover => {
                    if let Err(e) = next.run(context).await {
                        self.log(format!("{} caught {e}", self.label));
                    }
                    Ok(())
                }
            };
            self.log(format!("{} after", self.label));
            result
        }
    }

    impl Recording {
        fn log(&self, entry: String) {
            self.journal.lock().unwrap().push(entry);
        }
    }

    fn bind(scope: &Scope, journal: &Journal, label: &'static str, behavior: Behavior) -> InterceptorRef {
        let interceptor: Arc<dyn Interceptor> = Arc::new(Recording {
            label,
            behavior,
            journal: Arc::clone(journal),
        });
        scope
            .bind_constant(ServiceId::key(label), interceptor)
            .unwrap();
        InterceptorRef::keyed(label)
    }

    fn terminal(journal: &Journal, fail: bool) -> Next {
        let journal = Arc::clone(journal);
        Next::new(move |_| {
            let journal = Arc::clone(&journal);
            async move {
                journal.lock().unwrap().push("handler".to_string());
                if fail {
                    anyhow::bail!("handler failed");
                }
                Ok(())
            }
        })
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn runs_in_onion_order() {
        let scope = Scope::root();
        let journal = Journal::default();
        let chain = InterceptorChain::new()
            .handler(bind(&scope, &journal, "h", Behavior::Pass))
            .group(bind(&scope, &journal, "g", Behavior::Pass))
            .global(bind(&scope, &journal, "a", Behavior::Pass));
        let composed = chain.compose();
        composed.validate(&scope).unwrap();

        let context = RequestContext::new(scope.child()).unwrap();
        composed.run(&context, terminal(&journal, false)).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec!["a before", "g before", "h before", "handler", "h after", "g after", "a after"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_the_rest() {
        let scope = Scope::root();
        let journal = Journal::default();
        let composed = compose([
            bind(&scope, &journal, "a", Behavior::ShortCircuit),
            bind(&scope, &journal, "b", Behavior::Pass),
        ]);

        let context = RequestContext::new(scope.child()).unwrap();
        composed.run(&context, terminal(&journal, false)).await.unwrap();
        assert_eq!(entries(&journal), vec!["a before", "a after"]);
    }

    #[tokio::test]
    async fn next_may_run_more_than_once() {
        let scope = Scope::root();
        let journal = Journal::default();
        let composed = compose([bind(&scope, &journal, "retry", Behavior::Twice)]);

        let context = RequestContext::new(scope.child()).unwrap();
        composed.run(&context, terminal(&journal, false)).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec!["retry before", "handler", "handler", "retry after"]
        );
    }

    #[tokio::test]
    async fn failures_propagate_until_caught() {
        let scope = Scope::root();
        let journal = Journal::default();
        let propagating = compose([bind(&scope, &journal, "a", Behavior::Pass)]);
        let context = RequestContext::new(scope.child()).unwrap();
        let err = propagating
            .run(&context, terminal(&journal, true))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "handler failed");

        let recovering = compose([
            bind(&scope, &journal, "outer", Behavior::Pass),
            bind(&scope, &journal, "guard", Behavior::Recover),
        ]);
        let context = RequestContext::new(scope.child()).unwrap();
        recovering
            .run(&context, terminal(&journal, true))
            .await
            .unwrap();
        assert!(entries(&journal).contains(&"guard caught handler failed".to_string()));
    }

    struct Counting {
        serial: usize,
        seen: Journal,
    }

    #[async_trait]
    impl Interceptor for Counting {
        async fn intercept(&self, context: &RequestContext, next: Next) -> InterceptorResult {
            self.seen.lock().unwrap().push(self.serial.to_string());
            next.run(context).await
        }
    }

    #[tokio::test]
    async fn interceptors_are_resolved_per_unit_of_work() {
        let scope = Scope::root();
        let seen = Journal::default();
        let created = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let (id, binding) = ComponentDescriptor::from_fn(move |_| {
            let serial = created.fetch_add(1, Ordering::SeqCst);
            let seen = Arc::clone(&sink);
            async move { Ok(Counting { serial, seen }) }
        })
        .binding();
        scope.bind(id, binding).unwrap();

        let composed = compose([InterceptorRef::of::<Counting>()]);
        composed.validate(&scope).unwrap();
        for _ in 0..2 {
            let context = RequestContext::new(scope.child()).unwrap();
            composed.run(&context, Next::done()).await.unwrap();
        }
        assert_eq!(entries(&seen), vec!["0", "1"]);
    }

    #[test]
    fn unbound_interceptor_fails_validation() {
        let composed = compose([InterceptorRef::keyed("missing")]);
        let err = composed.validate(&Scope::root()).unwrap_err();
        assert!(err.is_unresolved());
    }
}
