use super::{EVENT_BUS_MODULE, EventBus, Subscription};
use crate::di::{
    ComponentDescriptor, ConstantDescriptor, FactoryDescriptor, Instance, Scope, ServiceId, downcast,
};
use crate::error::Result;
use crate::handler::EntryPoint;
use crate::interceptor::{InterceptorChain, InterceptorRef};
use crate::method::Method;
use crate::module::{Hook, ModuleBuilder, ModuleDescriptor, ModuleId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Bound into the scope of every event delivery.
#[derive(Clone)]
pub struct EventContext {
    topic: ServiceId,
    payload: Instance,
}

impl EventContext {
    pub fn topic(&self) -> &ServiceId {
        &self.topic
    }

    pub fn payload<P: Send + Sync + 'static>(&self) -> Result<Arc<P>> {
        downcast(Arc::clone(&self.payload))
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

struct EventHandler<T> {
    topic: ServiceId,
    interceptors: Vec<InterceptorRef>,
    method: Method<T, ()>,
}

/// Event handlers declared on one component `T`.
///
/// The component itself is registered separately, in the event-subscription
/// module or in a module it requires.
pub struct SubscriberController<T> {
    target: ServiceId,
    interceptors: Vec<InterceptorRef>,
    labels: HashSet<String>,
    handlers: Vec<EventHandler<T>>,
}

impl<T: Send + Sync + 'static> SubscriberController<T> {
    pub fn new() -> Self {
        Self {
            target: ServiceId::of::<T>(),
            interceptors: Vec::new(),
            labels: HashSet::new(),
            handlers: Vec::new(),
        }
    }

    /// Resolve the controller component under `id` instead of `T`'s type.
    pub fn target(mut self, id: impl Into<ServiceId>) -> Self {
        self.target = id.into();
        self
    }

    /// Controller-level interceptor, applied to every handler.
    pub fn interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn subscribe(self, topic: impl Into<ServiceId>, method: Method<T, ()>) -> Self {
        self.subscribe_with(topic, Vec::new(), method)
    }

    /// Subscribe `method` to `topic` with handler-level interceptors.
    pub fn subscribe_with(
        mut self,
        topic: impl Into<ServiceId>,
        interceptors: impl IntoIterator<Item = InterceptorRef>,
        method: Method<T, ()>,
    ) -> Self {
        self.handlers.push(EventHandler {
            topic: topic.into(),
            interceptors: interceptors.into_iter().collect(),
            method,
        });
        self
    }
}

impl<T: Send + Sync + 'static> Default for SubscriberController<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Type-erased view of a [`SubscriberController`].
trait Controller: Send + Sync {
    fn labels(&self) -> &HashSet<String>;

    fn validate(&self) -> Result<()>;

    fn entry_points(&self, root: &Scope, global: &[InterceptorRef]) -> Result<Vec<(ServiceId, EntryPoint)>>;
}

impl<T: Send + Sync + 'static> Controller for SubscriberController<T> {
    fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    fn validate(&self) -> Result<()> {
        self.handlers
            .iter()
            .try_for_each(|handler| handler.method.validate())
    }

    fn entry_points(&self, root: &Scope, global: &[InterceptorRef]) -> Result<Vec<(ServiceId, EntryPoint)>> {
        self.handlers
            .iter()
            .map(|handler| {
                let chain = InterceptorChain::new()
                    .extend_global(global.iter().cloned())
                    .extend_group(self.interceptors.iter().cloned())
                    .extend_handler(handler.interceptors.iter().cloned());
                let entry =
                    EntryPoint::for_method(root, &chain, self.target.clone(), handler.method.clone())?;
                Ok((handler.topic.clone(), entry))
            })
            .collect()
    }
}

struct SubscriptionState {
    module: ModuleId,
    global: Vec<InterceptorRef>,
    match_labels: Vec<String>,
    controllers: Vec<Box<dyn Controller>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SubscriptionState {
    fn selects(&self, controller: &dyn Controller) -> bool {
        self.match_labels
            .iter()
            .all(|label| controller.labels().contains(label))
    }

    fn validate(&self) -> Result<()> {
        self.controllers
            .iter()
            .try_for_each(|controller| controller.validate())
    }

    async fn subscribe_all(&self, scope: &Scope) -> anyhow::Result<()> {
        let bus = scope.resolve::<EventBus>().await?;

        // Compose every chain before subscribing anything, so a bad chain
        // leaves the bus untouched.
        let mut entries = Vec::new();
        for controller in &self.controllers {
            if self.selects(controller.as_ref()) {
                entries.extend(controller.entry_points(scope, &self.global)?);
            }
        }

        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (topic, entry) in entries {
            tracing::debug!(module = %self.module, topic = %topic, handler = entry.name(), "Subscribing event handler");
            subscriptions.push(deliver_to(&bus, topic, entry));
        }
        Ok(())
    }

    fn unsubscribe_all(&self) {
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let count = subscriptions.len();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        tracing::debug!(module = %self.module, count, "Event handlers unsubscribed");
    }
}

fn deliver_to(bus: &EventBus, topic: ServiceId, entry: EntryPoint) -> Subscription {
    let key = topic.clone();
    bus.subscribe_instance(topic, move |payload: Instance| {
        let entry = entry.clone();
        let topic = key.clone();
        async move {
            entry
                .dispatch(|context| {
                    context.bind(EventContext {
                        topic: topic.clone(),
                        payload: Arc::clone(&payload),
                    })?;
                    context.bind_instance(topic, payload)
                })
                .await
        }
    })
}

/// A module that subscribes controller methods to the [`EventBus`] when it
/// is created and unsubscribes them when it is destroyed.
///
/// Every delivery runs as its own unit of work: a child scope holding the
/// [`EventContext`] and the payload (bound under the topic identity), wrapped
/// in the module's global interceptors, then the controller's, then the
/// handler's.
pub struct EventSubscriptionModule;

impl EventSubscriptionModule {
    pub fn builder(id: impl Into<ModuleId>) -> EventSubscriptionModuleBuilder {
        let id = id.into();
        EventSubscriptionModuleBuilder {
            module: ModuleDescriptor::builder(id.clone()).requires(EVENT_BUS_MODULE),
            id,
            global: Vec::new(),
            match_labels: Vec::new(),
            controllers: Vec::new(),
        }
    }
}

pub struct EventSubscriptionModuleBuilder {
    module: ModuleBuilder,
    id: ModuleId,
    global: Vec<InterceptorRef>,
    match_labels: Vec<String>,
    controllers: Vec<Box<dyn Controller>>,
}

impl EventSubscriptionModuleBuilder {
    pub fn requires(mut self, id: impl Into<ModuleId>) -> Self {
        self.module = self.module.requires(id);
        self
    }

    pub fn component(mut self, component: ComponentDescriptor) -> Self {
        self.module = self.module.component(component);
        self
    }

    pub fn factory(mut self, factory: FactoryDescriptor) -> Self {
        self.module = self.module.factory(factory);
        self
    }

    pub fn constant(mut self, constant: ConstantDescriptor) -> Self {
        self.module = self.module.constant(constant);
        self
    }

    /// Interceptor applied around every handler of the module.
    pub fn interceptor(mut self, interceptor: InterceptorRef) -> Self {
        self.global.push(interceptor);
        self
    }

    /// Only subscribe controllers carrying this label. Repeatable; a
    /// controller must carry every listed label.
    pub fn match_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.match_labels
            .extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn controller<T: Send + Sync + 'static>(mut self, controller: SubscriberController<T>) -> Self {
        self.controllers.push(Box::new(controller));
        self
    }

    pub fn build(self) -> Arc<ModuleDescriptor> {
        let state = Arc::new(SubscriptionState {
            module: self.id.clone(),
            global: self.global,
            match_labels: self.match_labels,
            controllers: self.controllers,
            subscriptions: Mutex::new(Vec::new()),
        });

        let on_create = {
            let state = Arc::clone(&state);
            let checked = Arc::clone(&state);
            Hook::new(format!("{}::subscribe", self.id), move |scope: Scope| {
                let state = Arc::clone(&state);
                async move { state.subscribe_all(&scope).await }
            })
            .checked(move || checked.validate())
        };
        let on_destroy = Hook::new(format!("{}::unsubscribe", self.id), move |_: Scope| {
            state.unsubscribe_all();
            async { Ok(()) }
        });

        self.module
            .on_create(on_create)
            .on_destroy(on_destroy)
            .build()
    }
}
