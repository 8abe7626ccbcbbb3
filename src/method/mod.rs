//! Parameter bindings and method invocation.
//!
//! A [`Method`] pairs an async callable with the [`ParameterBinding`]s that
//! describe, position by position, how each argument is resolved from a
//! [`Scope`]. [`invoke`] resolves the arguments and calls the method.

use crate::di::{Constraint, Instance, Scope, ServiceId, downcast};
use crate::error::{Error, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Maps a resolved value to the value actually passed to the method.
pub type Transform = Arc<dyn Fn(Instance) -> Result<Instance> + Send + Sync>;

/// How one method parameter is resolved.
#[derive(Clone)]
pub struct ParameterBinding {
    id: ServiceId,
    constraint: Constraint,
    transform: Option<Transform>,
    optional: bool,
}

impl ParameterBinding {
    pub fn new(id: impl Into<ServiceId>) -> Self {
        Self {
            id: id.into(),
            constraint: Constraint::default(),
            transform: None,
            optional: false,
        }
    }

    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::new(ServiceId::of::<T>())
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.constraint.name = Some(name.into());
        self
    }

    pub fn tagged(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraint.tags.push((key.into(), value.into()));
        self
    }

    /// Tolerate a missing binding; the argument is then absent.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Apply `f` to the resolved value. Chained transforms run in order.
    pub fn transform<A, B, F>(mut self, f: F) -> Self
    where
        A: Send + Sync + 'static,
        B: Send + Sync + 'static,
        F: Fn(Arc<A>) -> B + Send + Sync + 'static,
    {
        let previous = self.transform.take();
        self.transform = Some(Arc::new(move |instance| {
            let instance = match &previous {
                Some(previous) => previous(instance)?,
                None => instance,
            };
            Ok(Arc::new(f(downcast::<A>(instance)?)) as Instance)
        }));
        self
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.id
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub(crate) async fn resolve(&self, scope: &Scope) -> Result<Option<Instance>> {
        let instance = match scope.resolve_instance(&self.id, &self.constraint).await {
            Ok(instance) => instance,
            Err(err) if self.optional && err.is_unresolved() => return Ok(None),
            Err(err) => return Err(err),
        };
        match &self.transform {
            Some(transform) => transform(instance).map(Some),
            None => Ok(Some(instance)),
        }
    }
}

/// Resolved arguments handed to a method, in declared order.
pub struct Arguments {
    method: Arc<str>,
    values: Vec<Option<Instance>>,
}

impl Arguments {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        self.optional(index)?.ok_or_else(|| {
            Error::unresolved_parameter(
                self.method.as_ref(),
                format!("optional parameter #{index} was not resolved"),
            )
        })
    }

    pub fn optional<T: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<T>>> {
        self.slot(index)?.clone().map(downcast::<T>).transpose()
    }

    /// Clone the argument out of its `Arc`.
    pub fn cloned<T: Clone + Send + Sync + 'static>(&self, index: usize) -> Result<T> {
        self.get::<T>(index).map(|value| T::clone(&value))
    }

    /// Fetch an argument bound under a trait-object identity.
    pub fn get_trait<T: ?Sized + Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        let wrapper = self.get::<Arc<T>>(index)?;
        Ok(Arc::clone(&wrapper))
    }

    fn slot(&self, index: usize) -> Result<&Option<Instance>> {
        self.values.get(index).ok_or_else(|| {
            Error::unresolved_parameter(
                self.method.as_ref(),
                format!("no parameter #{index} (arity {})", self.values.len()),
            )
        })
    }
}

type MethodFn<T, R> =
    Arc<dyn Fn(Arc<T>, Arguments) -> BoxFuture<'static, anyhow::Result<R>> + Send + Sync>;

/// An async method on `T` with its declared parameter bindings.
pub struct Method<T: ?Sized, R> {
    name: Arc<str>,
    arity: usize,
    params: BTreeMap<usize, ParameterBinding>,
    conflicts: Vec<usize>,
    call: MethodFn<T, R>,
}

impl<T: ?Sized, R> Clone for Method<T, R> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            arity: self.arity,
            params: self.params.clone(),
            conflicts: self.conflicts.clone(),
            call: Arc::clone(&self.call),
        }
    }
}

impl<T, R> Method<T, R>
where
    T: ?Sized + Send + Sync + 'static,
    R: Send + 'static,
{
    /// Declare a method taking `arity` parameters.
    pub fn new<F, Fut>(name: impl Into<String>, arity: usize, f: F) -> Self
    where
        F: Fn(Arc<T>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            arity,
            params: BTreeMap::new(),
            conflicts: Vec::new(),
            call: Arc::new(move |target, args| f(target, args).boxed()),
        }
    }

    /// Record the binding of parameter `index`.
    pub fn param(mut self, index: usize, binding: ParameterBinding) -> Self {
        if self.params.insert(index, binding).is_some() {
            self.conflicts.push(index);
        }
        self
    }

    /// Record a binding for the parameter after the highest one bound so far.
    pub fn bind(self, binding: ParameterBinding) -> Self {
        let index = self
            .params
            .keys()
            .next_back()
            .map_or(0, |last| last + 1);
        self.param(index, binding)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Check that every parameter is bound exactly once.
    pub fn validate(&self) -> Result<()> {
        if let Some(index) = self.conflicts.first() {
            return Err(Error::duplicate(format!(
                "parameter #{index} of '{}'",
                self.name
            )));
        }
        if self.params.len() != self.arity {
            return Err(Error::unresolved_parameter(
                self.name.as_ref(),
                format!(
                    "{} parameter bindings recorded for arity {}",
                    self.params.len(),
                    self.arity
                ),
            ));
        }
        if let Some(gap) = (0..self.arity).find(|index| !self.params.contains_key(index)) {
            return Err(Error::unresolved_parameter(
                self.name.as_ref(),
                format!("parameter #{gap} has no binding"),
            ));
        }
        Ok(())
    }

    pub async fn invoke(&self, scope: &Scope, target: Arc<T>) -> anyhow::Result<R> {
        invoke(scope, target, self).await
    }
}

/// Resolve `method`'s parameters against `scope` and call it on `target`.
pub async fn invoke<T, R>(scope: &Scope, target: Arc<T>, method: &Method<T, R>) -> anyhow::Result<R>
where
    T: ?Sized + Send + Sync + 'static,
    R: Send + 'static,
{
    method.validate()?;
    let mut values = Vec::with_capacity(method.arity);
    for binding in method.params.values() {
        values.push(binding.resolve(scope).await?);
    }
    let args = Arguments {
        method: Arc::clone(&method.name),
        values,
    };
    (method.call)(target, args).await
}
