use crate::di::{Constraint, Instance, Scope, ServiceId};
use crate::error::Result;
use std::sync::Arc;
use uuid::Uuid;

/// The context of one unit of work.
///
/// Wraps the unit's child scope. Creating a context binds it into that scope
/// so components and parameter bindings can resolve it; transports bind their
/// own context type (an HTTP request, an event delivery) next to it.
#[derive(Clone, Debug)]
pub struct RequestContext {
    scope: Scope,
    id: Uuid,
}

impl RequestContext {
    pub fn new(scope: Scope) -> Result<Self> {
        let context = Self {
            id: scope.id(),
            scope,
        };
        context
            .scope
            .bind_constant(ServiceId::of::<RequestContext>(), context.clone())?;
        Ok(context)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Identifies the unit of work in logs. Same as the scope's id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Bind `value` under its own type for the rest of the unit of work.
    pub fn bind<T: Send + Sync + 'static>(&self, value: T) -> Result<()> {
        self.scope.bind_constant(ServiceId::of::<T>(), value)
    }

    pub fn bind_as<T: Send + Sync + 'static>(&self, id: impl Into<ServiceId>, value: T) -> Result<()> {
        self.scope.bind_constant(id.into(), value)
    }

    pub fn bind_instance(&self, id: impl Into<ServiceId>, instance: Instance) -> Result<()> {
        self.scope.bind_instance(id.into(), instance)
    }

    pub async fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.scope.resolve::<T>().await
    }

    pub async fn resolve_as<T: Send + Sync + 'static>(&self, id: impl Into<ServiceId>) -> Result<Arc<T>> {
        self.scope
            .resolve_as::<T>(&id.into(), &Constraint::default())
            .await
    }
}
