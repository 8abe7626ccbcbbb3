use crate::di::{Constraint, ServiceId, Tag};
use crate::error::{Error, Result};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use uuid::Uuid;

/// A type-erased resolved value. Concrete values are stored as `Arc<T>`,
/// trait-object identities as `Arc<Arc<dyn Trait>>`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Produces an instance given the scope that asked for it.
pub type ProviderFn = Arc<dyn Fn(Scope) -> BoxFuture<'static, Result<Instance>> + Send + Sync>;

tokio::task_local! {
    /// Bindings currently being resolved on this task, outermost first.
    static RESOLUTION_PATH: Vec<PathEntry>;
}

/// One binding on the resolution path: its identity, the scope that owns it
/// and its name and tags. Resolving a sibling or an ancestor binding of the
/// same identity is not a cycle.
#[derive(Clone, PartialEq)]
struct PathEntry {
    id: ServiceId,
    owner: Uuid,
    name: Option<String>,
    tags: Vec<Tag>,
}

#[derive(Clone)]
pub(crate) enum Provider {
    Constant(Instance),
    Singleton {
        factory: ProviderFn,
        cell: Arc<OnceCell<Instance>>,
    },
    Transient(ProviderFn),
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub(crate) provider: Provider,
    pub(crate) name: Option<String>,
    pub(crate) tags: Vec<Tag>,
}

impl Binding {
    pub(crate) fn constant(instance: Instance) -> Self {
        Self {
            provider: Provider::Constant(instance),
            name: None,
            tags: Vec::new(),
        }
    }

    fn same_key(&self, other: &Binding) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

/// Hierarchical resolution context.
///
/// The root scope lives as long as the process. A child scope is created per
/// unit of work and [`dispose`](Scope::dispose)d once that unit completes;
/// everything bound into it is released with it and never leaks into the
/// parent. Singletons are cached in the scope that owns their binding, so every
/// descendant observes the same instance.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    id: Uuid,
    parent: Option<Scope>,
    bindings: DashMap<ServiceId, Vec<Binding>>,
    disposed: AtomicBool,
}

impl Scope {
    pub fn root() -> Self {
        Self::with_parent(None)
    }

    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    fn with_parent(parent: Option<Scope>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: Uuid::new_v4(),
                parent,
                bindings: DashMap::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Bind a constant value into this scope.
    pub fn bind_constant<T: Send + Sync + 'static>(&self, id: ServiceId, value: T) -> Result<()> {
        self.bind_instance(id, Arc::new(value))
    }

    /// Bind an already type-erased value into this scope.
    pub fn bind_instance(&self, id: ServiceId, instance: Instance) -> Result<()> {
        self.bind(id, Binding::constant(instance))
    }

    pub(crate) fn bind(&self, id: ServiceId, binding: Binding) -> Result<()> {
        self.ensure_live()?;
        let mut entry = self.inner.bindings.entry(id.clone()).or_default();
        if entry.iter().any(|existing| existing.same_key(&binding)) {
            return Err(Error::duplicate(describe(&id, &binding)));
        }
        entry.push(binding);
        Ok(())
    }

    /// Whether a binding for `id` is visible from this scope.
    pub fn contains(&self, id: &ServiceId) -> bool {
        let mut current = Some(self);
        while let Some(scope) = current {
            if scope
                .inner
                .bindings
                .get(id)
                .is_some_and(|entry| !entry.is_empty())
            {
                return true;
            }
            current = scope.parent();
        }
        false
    }

    /// Resolve `T` bound under its own type identity.
    pub async fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve_as(&ServiceId::of::<T>(), &Constraint::default())
            .await
    }

    /// Resolve the value bound under `id` and downcast it to `T`.
    pub async fn resolve_as<T: Send + Sync + 'static>(
        &self,
        id: &ServiceId,
        constraint: &Constraint,
    ) -> Result<Arc<T>> {
        let instance = self.resolve_instance(id, constraint).await?;
        downcast(instance)
    }

    /// Resolve a trait object bound through `ComponentDescriptor::bind_as`.
    pub async fn resolve_trait<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.resolve_trait_as(&ServiceId::of::<T>(), &Constraint::default())
            .await
    }

    pub async fn resolve_trait_as<T: ?Sized + Send + Sync + 'static>(
        &self,
        id: &ServiceId,
        constraint: &Constraint,
    ) -> Result<Arc<T>> {
        let instance = self.resolve_instance(id, constraint).await?;
        let wrapper = instance
            .downcast::<Arc<T>>()
            .map_err(|_| Error::downcast_failed::<Arc<T>>())?;
        Ok(Arc::clone(&wrapper))
    }

    /// Walk from this scope up through its ancestors until a binding for `id`
    /// matching `constraint` is found, then produce its value.
    pub async fn resolve_instance(&self, id: &ServiceId, constraint: &Constraint) -> Result<Instance> {
        self.ensure_live()?;

        let (owner, binding) = self
            .lookup(id, constraint)?
            .ok_or_else(|| Error::resolution(id, "no binding found in scope chain"))?;

        let entry = PathEntry {
            id: id.clone(),
            owner: owner.inner.id,
            name: binding.name.clone(),
            tags: binding.tags.clone(),
        };
        let mut path = RESOLUTION_PATH.try_with(Clone::clone).unwrap_or_default();
        let cyclic = path.contains(&entry);
        path.push(entry);
        if cyclic {
            let chain = path
                .iter()
                .map(|entry| entry.id.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Error::CircularResolution { chain });
        }

        RESOLUTION_PATH
            .scope(path, self.provide(owner, binding))
            .await
    }

    async fn provide(&self, owner: Scope, binding: Binding) -> Result<Instance> {
        match binding.provider {
            Provider::Constant(instance) => Ok(instance),
            Provider::Transient(factory) => factory(self.clone()).await,
            Provider::Singleton { factory, cell } => cell
                .get_or_try_init(|| factory(owner))
                .await
                .map(Arc::clone),
        }
    }

    fn lookup(&self, id: &ServiceId, constraint: &Constraint) -> Result<Option<(Scope, Binding)>> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(entry) = scope.inner.bindings.get(id) {
                let mut candidates = entry
                    .iter()
                    .filter(|binding| constraint.matches(binding.name.as_deref(), &binding.tags));
                match (candidates.next(), candidates.count()) {
                    (Some(binding), 0) => return Ok(Some((scope.clone(), binding.clone()))),
                    (Some(_), rest) => {
                        return Err(Error::AmbiguousBinding {
                            id: id.to_string(),
                            count: rest + 1,
                        });
                    }
                    (None, _) => {}
                }
            }
            current = scope.parent();
        }
        Ok(None)
    }

    /// Release every binding created in this scope. Further resolution through
    /// this scope fails with [`Error::ScopeDisposed`].
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            self.inner.bindings.clear();
            tracing::trace!(scope = %self.inner.id, "Scope disposed");
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::ScopeDisposed {
                scope: self.inner.id,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("root", &self.is_root())
            .field("bindings", &self.inner.bindings.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(instance: Instance) -> Result<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| Error::downcast_failed::<T>())
}

fn describe(id: &ServiceId, binding: &Binding) -> String {
    let mut out = id.to_string();
    if let Some(name) = &binding.name {
        out.push_str(&format!(" (named '{name}')"));
    }
    for (key, value) in &binding.tags {
        out.push_str(&format!(" [{key}={value}]"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::{ComponentDescriptor, ComponentScope};
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        serial: usize,
    }

    fn counter_component(scope: ComponentScope, created: Arc<AtomicUsize>) -> ComponentDescriptor {
        ComponentDescriptor::from_fn(move |_scope| {
            let serial = created.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Counter { serial }) }
        })
        .scope(scope)
    }

    fn install(scope: &Scope, component: &ComponentDescriptor) {
        let (id, binding) = component.binding();
        scope.bind(id, binding).unwrap();
    }

    #[tokio::test]
    async fn transient_resolves_fresh_instances() {
        let root = Scope::root();
        let created = Arc::new(AtomicUsize::new(0));
        install(&root, &counter_component(ComponentScope::Transient, created.clone()));

        let a = root.resolve::<Counter>().await.unwrap();
        let b = root.resolve::<Counter>().await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.serial, b.serial);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn singleton_is_shared_with_descendants() {
        let root = Scope::root();
        let created = Arc::new(AtomicUsize::new(0));
        install(&root, &counter_component(ComponentScope::Singleton, created.clone()));

        let child = root.child();
        let grandchild = child.child();
        let a = root.resolve::<Counter>().await.unwrap();
        let b = grandchild.resolve::<Counter>().await.unwrap();
        let c = child.resolve::<Counter>().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn child_bindings_do_not_leak_into_parent() {
        let root = Scope::root();
        let child = root.child();
        child
            .bind_constant(ServiceId::key("request-id"), 7u32)
            .unwrap();

        let id = ServiceId::key("request-id");
        assert_eq!(*child.resolve_as::<u32>(&id, &Constraint::default()).await.unwrap(), 7);
        let err = root
            .resolve_as::<u32>(&id, &Constraint::default())
            .await
            .unwrap_err();
        assert!(err.is_unresolved());

        child.dispose();
        assert!(matches!(
            child.resolve_as::<u32>(&id, &Constraint::default()).await,
            Err(Error::ScopeDisposed { .. })
        ));
    }

    #[tokio::test]
    async fn child_constant_shadows_parent() {
        let root = Scope::root();
        root.bind_constant(ServiceId::key("tenant"), "root".to_string())
            .unwrap();
        let child = root.child();
        child
            .bind_constant(ServiceId::key("tenant"), "child".to_string())
            .unwrap();

        let id = ServiceId::key("tenant");
        let seen = child
            .resolve_as::<String>(&id, &Constraint::default())
            .await
            .unwrap();
        assert_eq!(seen.as_str(), "child");
    }

    #[tokio::test]
    async fn duplicate_binding_is_rejected() {
        let root = Scope::root();
        root.bind_constant(ServiceId::key("port"), 8080u16).unwrap();
        let err = root
            .bind_constant(ServiceId::key("port"), 9090u16)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration { .. }));
    }

    #[tokio::test]
    async fn named_and_tagged_bindings_disambiguate() {
        let root = Scope::root();
        let id = ServiceId::key("db-url");
        for (name, region, url) in [("primary", "eu", "pg://a"), ("replica", "us", "pg://b")] {
            root.bind(
                id.clone(),
                Binding {
                    provider: Provider::Constant(Arc::new(url.to_string())),
                    name: Some(name.to_string()),
                    tags: vec![("region".to_string(), region.to_string())],
                },
            )
            .unwrap();
        }

        let replica = root
            .resolve_as::<String>(&id, &Constraint::named("replica"))
            .await
            .unwrap();
        assert_eq!(replica.as_str(), "pg://b");

        let eu = root
            .resolve_as::<String>(&id, &Constraint::tagged("region", "eu"))
            .await
            .unwrap();
        assert_eq!(eu.as_str(), "pg://a");

        let err = root
            .resolve_as::<String>(&id, &Constraint::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AmbiguousBinding { count: 2, .. }));
    }

    #[tokio::test]
    async fn circular_resolution_is_reported() {
        let root = Scope::root();
        let ping = ServiceId::key("ping");
        let pong = ServiceId::key("pong");
        for (id, next) in [(ping.clone(), pong.clone()), (pong.clone(), ping.clone())] {
            let factory: ProviderFn = Arc::new(move |scope: Scope| {
                let next = next.clone();
                async move { scope.resolve_instance(&next, &Constraint::default()).await }.boxed()
            });
            root.bind(
                id,
                Binding {
                    provider: Provider::Singleton {
                        factory,
                        cell: Arc::new(OnceCell::new()),
                    },
                    name: None,
                    tags: Vec::new(),
                },
            )
            .unwrap();
        }

        let err = root
            .resolve_instance(&ping, &Constraint::default())
            .await
            .unwrap_err();
        match err {
            Error::CircularResolution { chain } => assert_eq!(chain, "ping -> pong -> ping"),
            other => panic!("expected CircularResolution, got {other:?}"),
        }
    }

    fn transient(factory: ProviderFn, name: Option<&str>) -> Binding {
        Binding {
            provider: Provider::Transient(factory),
            name: name.map(str::to_string),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn named_binding_may_wrap_a_sibling_of_the_same_identity() {
        let url = ServiceId::key("url");
        let root = Scope::root();
        root.bind(
                url.clone(),
                Binding {
                    name: Some("base".into()),
                    ..Binding::constant(Arc::new(String::from("example.com")))
                },
            )
            .unwrap();
        let base = url.clone();
        let secure: ProviderFn = Arc::new(move |scope: Scope| {
            let base = base.clone();
            async move {
                let host = scope.resolve_as::<String>(&base, &Constraint::named("base")).await;
                host.map(|host| Arc::new(format!("https://{host}")) as Instance)
            }
            .boxed()
        });
        root.bind(url.clone(), transient(secure, Some("secure")))
            .unwrap();

        let resolved = root
            .resolve_as::<String>(&url, &Constraint::named("secure"))
            .await
            .unwrap();
        assert_eq!(*resolved, "https://example.com");
    }

    #[tokio::test]
    async fn child_binding_may_wrap_its_parents_binding() {
        let root = Scope::root();
        let greeting = ServiceId::key("greeting");
        root.bind_constant(greeting.clone(), String::from("hello"))
            .unwrap();

        let child = root.child();
        let inner = greeting.clone();
        let loud: ProviderFn = Arc::new(move |scope: Scope| {
            let inner = inner.clone();
            async move {
                let parent = scope
                    .parent()
                    .cloned()
                    .ok_or_else(|| Error::resolution(&inner, "no parent scope"))?;
                let text = parent.resolve_as::<String>(&inner, &Constraint::default()).await?;
                Ok(Arc::new(text.to_uppercase()) as Instance)
            }
            .boxed()
        });
        child.bind(greeting.clone(), transient(loud, None)).unwrap();

        let resolved = child
            .resolve_as::<String>(&greeting, &Constraint::default())
            .await
            .unwrap();
        assert_eq!(*resolved, "HELLO");
    }
}
