//! Module declarations.
//!
//! A [`ModuleDescriptor`] bundles components, factories, constants and
//! lifecycle hooks, and names the modules it requires. Descriptors are built
//! once through [`ModuleDescriptor::builder`] and are immutable afterwards;
//! the graph resolver and the lifecycle manager only read them.
//!
//! ```rust,ignore
//! let database = ModuleDescriptor::builder("database")
//!     .constant(ConstantDescriptor::new("db-url", "postgres://localhost".to_string()))
//!     .component(ComponentDescriptor::injectable::<Pool>().singleton())
//!     .on_destroy(Hook::on_destroy::<Pool>())
//!     .build();
//!
//! let users = ModuleDescriptor::builder("users")
//!     .requires(database.id().clone())
//!     .component(ComponentDescriptor::injectable::<UserService>())
//!     .build();
//! ```

mod graph;

pub use graph::{ModuleGraph, resolve};

use crate::di::{
    Binding, ComponentDescriptor, ComponentScope, ConstantDescriptor, Constraint,
    FactoryDescriptor, Scope, ServiceId,
};
use crate::error::{Error, Result};
use crate::lifecycle::{OnModuleCreate, OnModuleDestroy};
use crate::method::Method;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Unique identity of a declared module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(Cow<'static, str>);

impl ModuleId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ModuleId {
    fn from(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

type HookFn = Arc<dyn Fn(Scope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type HookCheck = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// A lifecycle hook: a named async action run against the application scope.
#[derive(Clone)]
pub struct Hook {
    name: Arc<str>,
    run: HookFn,
    check: Option<HookCheck>,
}

impl Hook {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Scope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            run: Arc::new(move |scope| f(scope).boxed()),
            check: None,
        }
    }

    /// A free-standing method whose parameters are resolved from the scope.
    pub fn function(method: Method<(), ()>) -> Self {
        let name = method.name().to_string();
        let checked = method.clone();
        Self::new(name, move |scope: Scope| {
            let method = method.clone();
            async move { method.invoke(&scope, Arc::new(())).await }
        })
        .checked(move || checked.validate())
    }

    /// A method on the component `T`, which is resolved from the scope first.
    pub fn component<T: Send + Sync + 'static>(method: Method<T, ()>) -> Self {
        let name = format!("{}::{}", std::any::type_name::<T>(), method.name());
        let checked = method.clone();
        Self::new(name, move |scope: Scope| {
            let method = method.clone();
            async move {
                let target = scope.resolve::<T>().await?;
                method.invoke(&scope, target).await
            }
        })
        .checked(move || checked.validate())
    }

    /// Run [`OnModuleCreate::on_module_create`] on the component `T`.
    pub fn on_create<T: OnModuleCreate + 'static>() -> Self {
        Self::new(
            format!("{}::on_module_create", std::any::type_name::<T>()),
            |scope: Scope| async move {
                let target = scope.resolve::<T>().await?;
                target.on_module_create(&scope).await
            },
        )
    }

    /// Run [`OnModuleDestroy::on_module_destroy`] on the component `T`.
    pub fn on_destroy<T: OnModuleDestroy + 'static>() -> Self {
        Self::new(
            format!("{}::on_module_destroy", std::any::type_name::<T>()),
            |scope: Scope| async move {
                let target = scope.resolve::<T>().await?;
                target.on_module_destroy(&scope).await
            },
        )
    }

    /// Attach a definition check, run when the owning module is validated.
    pub fn checked<F>(mut self, check: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.check = Some(Arc::new(check));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.check.as_ref().map_or(Ok(()), |check| check())
    }

    pub(crate) async fn run(&self, scope: &Scope) -> anyhow::Result<()> {
        (self.run)(scope.clone()).await
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hook").field(&self.name).finish()
    }
}

/// Immutable description of one module.
pub struct ModuleDescriptor {
    id: ModuleId,
    requires: Vec<ModuleId>,
    components: Vec<ComponentDescriptor>,
    factories: Vec<FactoryDescriptor>,
    constants: Vec<ConstantDescriptor>,
    on_create: Vec<Hook>,
    on_destroy: Vec<Hook>,
}

impl ModuleDescriptor {
    pub fn builder(id: impl Into<ModuleId>) -> ModuleBuilder {
        ModuleBuilder {
            descriptor: ModuleDescriptor {
                id: id.into(),
                requires: Vec::new(),
                components: Vec::new(),
                factories: Vec::new(),
                constants: Vec::new(),
                on_create: Vec::new(),
                on_destroy: Vec::new(),
            },
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn requires(&self) -> &[ModuleId] {
        &self.requires
    }

    pub fn components(&self) -> &[ComponentDescriptor] {
        &self.components
    }

    pub fn factories(&self) -> &[FactoryDescriptor] {
        &self.factories
    }

    pub fn constants(&self) -> &[ConstantDescriptor] {
        &self.constants
    }

    pub fn on_create_hooks(&self) -> &[Hook] {
        &self.on_create
    }

    pub fn on_destroy_hooks(&self) -> &[Hook] {
        &self.on_destroy
    }

    /// Check the declaration on its own: one binding per (identity, name,
    /// tags) within the module, valid component identities and fully bound
    /// hook methods.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (id, binding) in self.bindings() {
            if !seen.insert((id.clone(), binding.name, binding.tags)) {
                return Err(Error::duplicate(format!("{id} in module '{}'", self.id)));
            }
        }
        for component in &self.components {
            component.validate()?;
        }
        for hook in self.on_create.iter().chain(&self.on_destroy) {
            hook.validate()?;
        }
        Ok(())
    }

    /// Bind constants, then factories, then components into `scope`.
    pub(crate) fn install(&self, scope: &Scope) -> Result<()> {
        for (id, binding) in self.bindings() {
            scope.bind(id, binding)?;
        }
        Ok(())
    }

    /// Construct every singleton component once so that construction failures
    /// surface at start-up. Transient components stay lazy.
    pub(crate) async fn instantiate_singletons(&self, scope: &Scope) -> Result<()> {
        for component in &self.components {
            if component.component_scope() != ComponentScope::Singleton {
                continue;
            }
            let constraint = Constraint {
                name: component.name().map(str::to_owned),
                tags: component.tags().to_vec(),
            };
            scope
                .resolve_instance(component.service_id(), &constraint)
                .await?;
            tracing::debug!(
                module = %self.id,
                component = component.type_name(),
                "Singleton instantiated"
            );
        }
        Ok(())
    }

    fn bindings(&self) -> Vec<(ServiceId, Binding)> {
        self.constants
            .iter()
            .map(ConstantDescriptor::binding)
            .chain(self.factories.iter().map(FactoryDescriptor::binding))
            .chain(self.components.iter().map(ComponentDescriptor::binding))
            .collect()
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("id", &self.id)
            .field("requires", &self.requires)
            .field("components", &self.components.len())
            .field("factories", &self.factories.len())
            .field("constants", &self.constants.len())
            .field("on_create", &self.on_create)
            .field("on_destroy", &self.on_destroy)
            .finish()
    }
}

pub struct ModuleBuilder {
    descriptor: ModuleDescriptor,
}

impl ModuleBuilder {
    /// Require another module to be created before this one. Repeated
    /// requirements are recorded once.
    pub fn requires(mut self, id: impl Into<ModuleId>) -> Self {
        let id = id.into();
        if !self.descriptor.requires.contains(&id) {
            self.descriptor.requires.push(id);
        }
        self
    }

    pub fn component(mut self, component: ComponentDescriptor) -> Self {
        self.descriptor.components.push(component);
        self
    }

    pub fn factory(mut self, factory: FactoryDescriptor) -> Self {
        self.descriptor.factories.push(factory);
        self
    }

    pub fn constant(mut self, constant: ConstantDescriptor) -> Self {
        self.descriptor.constants.push(constant);
        self
    }

    pub fn on_create(mut self, hook: Hook) -> Self {
        self.descriptor.on_create.push(hook);
        self
    }

    pub fn on_destroy(mut self, hook: Hook) -> Self {
        self.descriptor.on_destroy.push(hook);
        self
    }

    pub fn build(self) -> Arc<ModuleDescriptor> {
        Arc::new(self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Arguments, ParameterBinding};

    struct Cache;

    #[test]
    fn duplicate_identity_in_one_module_is_rejected() {
        let module = ModuleDescriptor::builder("cache")
            .constant(ConstantDescriptor::new("ttl", 30u64))
            .factory(FactoryDescriptor::new("ttl", |_| async { Ok(60u64) }))
            .build();
        assert!(matches!(
            module.validate(),
            Err(Error::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn named_bindings_of_one_identity_may_coexist() {
        let module = ModuleDescriptor::builder("cache")
            .constant(ConstantDescriptor::new("ttl", 30u64).named("short"))
            .constant(ConstantDescriptor::new("ttl", 3600u64).named("long"))
            .build();
        module.validate().unwrap();
    }

    #[test]
    fn hook_with_unbound_parameter_fails_validation() {
        let method = Method::new("warm", 1, |_: Arc<Cache>, _: Arguments| async { Ok(()) });
        let module = ModuleDescriptor::builder("cache")
            .on_create(Hook::component(method))
            .build();
        assert!(matches!(
            module.validate(),
            Err(Error::UnresolvedParameter { .. })
        ));
    }

    #[tokio::test]
    async fn install_binds_every_declaration() {
        let module = ModuleDescriptor::builder("cache")
            .requires("config")
            .requires("config")
            .constant(ConstantDescriptor::new("ttl", 30u64))
            .component(ComponentDescriptor::from_fn(|_| async { Ok(Cache) }).singleton())
            .build();
        assert_eq!(module.requires().len(), 1);

        let root = Scope::root();
        module.install(&root).unwrap();
        module.instantiate_singletons(&root).await.unwrap();

        let a = root.resolve::<Cache>().await.unwrap();
        let b = root.child().resolve::<Cache>().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(root.contains(&ServiceId::key("ttl")));
    }

    #[tokio::test]
    async fn function_hook_resolves_its_parameters() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);
        let method = Method::new("record", 1, move |_: Arc<()>, args: Arguments| {
            let sink = Arc::clone(&sink);
            async move {
                let ttl = args.get::<u64>(0)?;
                *sink.lock().unwrap() = Some(*ttl);
                anyhow::Ok(())
            }
        })
        .bind(ParameterBinding::new("ttl"));

        let root = Scope::root();
        root.bind_constant(ServiceId::key("ttl"), 30u64).unwrap();
        Hook::function(method).run(&root).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(30));
    }
}
