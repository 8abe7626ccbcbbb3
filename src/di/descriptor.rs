use crate::di::scope::{Binding, Instance, Provider, ProviderFn, downcast};
use crate::di::{Injectable, Scope, ServiceId, Tag};
use crate::error::{Error, Result};
use futures::FutureExt;
use std::any::TypeId;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Lifetime of a component or factory product.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display, strum_macros::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentScope {
    /// One instance, cached in the scope that owns the binding.
    Singleton,
    /// A new instance per resolution.
    #[default]
    Transient,
}

/// The parts shared by every provider-backed descriptor.
#[derive(Clone)]
struct ProviderSpec {
    id: ServiceId,
    scope: ComponentScope,
    name: Option<String>,
    tags: Vec<Tag>,
    factory: ProviderFn,
}

impl ProviderSpec {
    fn new<T, F, Fut>(id: ServiceId, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let factory: ProviderFn = Arc::new(move |scope| {
            let pending = factory(scope);
            async move { pending.await.map(|value| Arc::new(value) as Instance) }.boxed()
        });
        Self {
            id,
            scope: ComponentScope::default(),
            name: None,
            tags: Vec::new(),
            factory,
        }
    }

    fn binding(&self) -> (ServiceId, Binding) {
        let provider = match self.scope {
            ComponentScope::Singleton => Provider::Singleton {
                factory: Arc::clone(&self.factory),
                cell: Arc::new(OnceCell::new()),
            },
            ComponentScope::Transient => Provider::Transient(Arc::clone(&self.factory)),
        };
        (
            self.id.clone(),
            Binding {
                provider,
                name: self.name.clone(),
                tags: self.tags.clone(),
            },
        )
    }
}

/// Declares a component: a value constructed from the scope, resolvable by
/// identity. The identity defaults to the component's own type.
#[derive(Clone)]
pub struct ComponentDescriptor {
    spec: ProviderSpec,
    type_name: &'static str,
    concrete: TypeId,
    cast_source: Option<(TypeId, &'static str)>,
}

impl ComponentDescriptor {
    /// Register a component constructed through [`Injectable::inject`].
    pub fn injectable<T: Injectable>() -> Self {
        Self::from_fn(|scope: Scope| async move { T::inject(&scope).await })
    }

    /// Register a component constructed by an async factory function.
    pub fn from_fn<T, F, Fut>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            spec: ProviderSpec::new(ServiceId::of::<T>(), factory),
            type_name: std::any::type_name::<T>(),
            concrete: TypeId::of::<T>(),
            cast_source: None,
        }
    }

    pub fn scope(mut self, scope: ComponentScope) -> Self {
        self.spec.scope = scope;
        self
    }

    pub fn singleton(self) -> Self {
        self.scope(ComponentScope::Singleton)
    }

    pub fn transient(self) -> Self {
        self.scope(ComponentScope::Transient)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.spec.name = Some(name.into());
        self
    }

    pub fn tagged(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.tags.push((key.into(), value.into()));
        self
    }

    /// Override the identity with a plain key. The bound value keeps its type.
    pub fn id(mut self, id: impl Into<ServiceId>) -> Self {
        self.spec.id = id.into();
        self
    }

    /// Bind the component under a trait-object identity.
    ///
    /// `Impl` must be the component's own type; anything else is rejected when
    /// the owning module is validated.
    pub fn bind_as<Trait, Impl, F>(mut self, caster: F) -> Self
    where
        Trait: ?Sized + Send + Sync + 'static,
        Impl: Send + Sync + 'static,
        F: Fn(Arc<Impl>) -> Arc<Trait> + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.spec.factory);
        let caster = Arc::new(caster);
        self.spec.factory = Arc::new(move |scope| {
            let inner = Arc::clone(&inner);
            let caster = Arc::clone(&caster);
            async move {
                let concrete = downcast::<Impl>(inner(scope).await?)?;
                let trait_object: Arc<Trait> = caster(concrete);
                Ok(Arc::new(trait_object) as Instance)
            }
            .boxed()
        });
        self.spec.id = ServiceId::of::<Trait>();
        self.cast_source = Some((TypeId::of::<Impl>(), std::any::type_name::<Impl>()));
        self
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.spec.id
    }

    pub fn component_scope(&self) -> ComponentScope {
        self.spec.scope
    }

    pub fn name(&self) -> Option<&str> {
        self.spec.name.as_deref()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.spec.tags
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self.cast_source {
            Some((source, source_name)) if source != self.concrete => Err(Error::InvalidIdentity {
                component: self.type_name.to_string(),
                message: format!("cannot be bound as '{}' through '{source_name}'", self.spec.id),
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn binding(&self) -> (ServiceId, Binding) {
        self.spec.binding()
    }
}

/// Declares a factory: an async function producing the value bound under an
/// explicit identity.
#[derive(Clone)]
pub struct FactoryDescriptor {
    spec: ProviderSpec,
}

impl FactoryDescriptor {
    pub fn new<T, F, Fut>(id: impl Into<ServiceId>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            spec: ProviderSpec::new(id.into(), factory),
        }
    }

    pub fn scope(mut self, scope: ComponentScope) -> Self {
        self.spec.scope = scope;
        self
    }

    pub fn singleton(self) -> Self {
        self.scope(ComponentScope::Singleton)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.spec.name = Some(name.into());
        self
    }

    pub fn tagged(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.tags.push((key.into(), value.into()));
        self
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.spec.id
    }

    pub(crate) fn binding(&self) -> (ServiceId, Binding) {
        self.spec.binding()
    }
}

/// Declares a constant value bound under an identity.
#[derive(Clone)]
pub struct ConstantDescriptor {
    id: ServiceId,
    value: Instance,
    name: Option<String>,
    tags: Vec<Tag>,
}

impl ConstantDescriptor {
    pub fn new<T: Send + Sync + 'static>(id: impl Into<ServiceId>, value: T) -> Self {
        Self {
            id: id.into(),
            value: Arc::new(value),
            name: None,
            tags: Vec::new(),
        }
    }

    /// A constant identified by its own type.
    pub fn of<T: Send + Sync + 'static>(value: T) -> Self {
        Self::new(ServiceId::of::<T>(), value)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tagged(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.id
    }

    pub(crate) fn binding(&self) -> (ServiceId, Binding) {
        (
            self.id.clone(),
            Binding {
                provider: Provider::Constant(Arc::clone(&self.value)),
                name: self.name.clone(),
                tags: self.tags.clone(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".to_string()
        }
    }

    struct Config {
        greeting: String,
    }

    struct Service {
        config: Arc<Config>,
    }

    #[async_trait]
    impl Injectable for Service {
        async fn inject(scope: &Scope) -> Result<Self> {
            Ok(Self {
                config: scope.resolve::<Config>().await?,
            })
        }
    }

    fn install(scope: &Scope, (id, binding): (ServiceId, Binding)) {
        scope.bind(id, binding).unwrap();
    }

    #[test]
    fn scope_names_round_trip_through_strum() {
        assert_eq!(ComponentScope::Singleton.to_string(), "SINGLETON");
        assert_eq!(
            "TRANSIENT".parse::<ComponentScope>().unwrap(),
            ComponentScope::Transient
        );
        assert_eq!(ComponentScope::default(), ComponentScope::Transient);
    }

    #[tokio::test]
    async fn injectable_component_pulls_dependencies_from_scope() {
        let root = Scope::root();
        install(
            &root,
            ConstantDescriptor::of(Config {
                greeting: "hi".into(),
            })
            .binding(),
        );
        install(&root, ComponentDescriptor::injectable::<Service>().binding());

        let service = root.resolve::<Service>().await.unwrap();
        assert_eq!(service.config.greeting, "hi");
    }

    #[tokio::test]
    async fn bind_as_exposes_a_trait_identity() {
        let root = Scope::root();
        let component = ComponentDescriptor::from_fn(|_| async { Ok(English) })
            .singleton()
            .bind_as::<dyn Greeter, English, _>(|english| english as Arc<dyn Greeter>);
        component.validate().unwrap();
        install(&root, component.binding());

        let greeter = root.resolve_trait::<dyn Greeter>().await.unwrap();
        assert_eq!(greeter.greet(), "hello");
        assert!(root.resolve::<English>().await.is_err());
    }

    #[test]
    fn bind_as_from_a_foreign_type_is_invalid() {
        let component = ComponentDescriptor::from_fn(|_| async {
            Ok(Config {
                greeting: String::new(),
            })
        })
        .bind_as::<dyn Greeter, English, _>(|english| english as Arc<dyn Greeter>);
        assert!(matches!(
            component.validate(),
            Err(Error::InvalidIdentity { .. })
        ));
    }

    #[tokio::test]
    async fn factory_binds_under_explicit_key() {
        let root = Scope::root();
        install(
            &root,
            FactoryDescriptor::new("answer", |_| async { Ok(42u64) })
                .singleton()
                .binding(),
        );
        let id = ServiceId::key("answer");
        let value = root
            .resolve_as::<u64>(&id, &Default::default())
            .await
            .unwrap();
        assert_eq!(*value, 42);
    }
}
