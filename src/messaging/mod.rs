//! In-process event bus with acknowledged delivery.
//!
//! [`EventBus::announce`] hands the payload to every subscriber registered on
//! the topic when the announce starts, then waits for all of them. It fails
//! if any subscriber failed, but only after every subscriber has finished.

mod subscription;

pub use subscription::{
    EventContext, EventSubscriptionModule, EventSubscriptionModuleBuilder, SubscriberController,
};

use crate::di::{ComponentDescriptor, Instance, ServiceId, downcast};
use crate::method::ParameterBinding;
use crate::module::ModuleDescriptor;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Identity of the built-in module providing the [`EventBus`].
pub const EVENT_BUS_MODULE: &str = "modloom::event-bus";

type Callback = Arc<dyn Fn(Instance) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

/// Subscribers of one topic. Announces read a snapshot; subscribe and
/// unsubscribe publish a new list.
struct EventChannel {
    subscribers: ArcSwap<Vec<Arc<Subscriber>>>,
}

impl EventChannel {
    fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(Vec::new()),
        }
    }
}

/// A topic-keyed publish/subscribe channel.
///
/// Channels are created on first use and live as long as the bus.
#[derive(Clone, Default)]
pub struct EventBus {
    channels: Arc<DashMap<ServiceId, Arc<EventChannel>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, topic: &ServiceId) -> Arc<EventChannel> {
        if let Some(channel) = self.channels.get(topic) {
            return Arc::clone(&channel);
        }
        let channel = self
            .channels
            .entry(topic.clone())
            .or_insert_with(|| Arc::new(EventChannel::new()));
        Arc::clone(&channel)
    }

    /// Deliver `payload` to the current subscribers of `topic` and wait for
    /// all of them. Returns the first failure in subscription order.
    pub async fn announce<T: Send + Sync + 'static>(
        &self,
        topic: impl Into<ServiceId>,
        payload: T,
    ) -> anyhow::Result<()> {
        self.announce_instance(topic.into(), Arc::new(payload))
            .await
    }

    pub async fn announce_instance(&self, topic: ServiceId, payload: Instance) -> anyhow::Result<()> {
        let snapshot = self.channel(&topic).subscribers.load_full();
        tracing::trace!(topic = %topic, subscribers = snapshot.len(), "Announcing event");

        // Every callback is started before any of them is awaited.
        let pending: Vec<_> = snapshot
            .iter()
            .map(|subscriber| (subscriber.callback)(Arc::clone(&payload)))
            .collect();
        join_all(pending)
            .await
            .into_iter()
            .find_map(Result::err)
            .map_or(Ok(()), Err)
    }

    /// Subscribe `callback` to `topic`. A payload of another type than `T`
    /// fails that subscriber's delivery.
    pub fn subscribe<T, F, Fut>(&self, topic: impl Into<ServiceId>, callback: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe_instance(topic, move |payload: Instance| match downcast::<T>(payload) {
            Ok(payload) => callback(payload).boxed(),
            Err(e) => futures::future::ready(Err(anyhow::Error::from(e))).boxed(),
        })
    }

    pub fn subscribe_instance<F, Fut>(&self, topic: impl Into<ServiceId>, callback: F) -> Subscription
    where
        F: Fn(Instance) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let topic = topic.into();
        let channel = self.channel(&topic);
        let subscriber = Arc::new(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            callback: Arc::new(move |payload| callback(payload).boxed()),
        });
        let id = subscriber.id;
        channel.subscribers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&subscriber));
            next
        });
        tracing::debug!(topic = %topic, subscription = id, "Subscribed");

        Subscription { channel, id, topic }
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &ServiceId) -> usize {
        self.channels
            .get(topic)
            .map_or(0, |channel| channel.subscribers.load().len())
    }
}

/// A live subscription. Dropping it leaves the subscription in place;
/// [`unsubscribe`](Subscription::unsubscribe) removes it.
#[must_use = "a subscription stays active until unsubscribe is called"]
pub struct Subscription {
    channel: Arc<EventChannel>,
    id: u64,
    topic: ServiceId,
}

impl Subscription {
    pub fn topic(&self) -> &ServiceId {
        &self.topic
    }

    /// Remove the subscription. Announces already in flight still deliver
    /// to it.
    pub fn unsubscribe(self) {
        self.channel.subscribers.rcu(|current| {
            current
                .iter()
                .filter(|subscriber| subscriber.id != self.id)
                .cloned()
                .collect::<Vec<_>>()
        });
        tracing::debug!(topic = %self.topic, subscription = self.id, "Unsubscribed");
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

/// Announces payloads of type `T` on one topic.
pub struct EventAnnouncer<T> {
    bus: EventBus,
    topic: ServiceId,
    _payload: PhantomData<fn(T)>,
}

impl<T> Clone for EventAnnouncer<T> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            topic: self.topic.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> EventAnnouncer<T> {
    pub fn new(bus: EventBus, topic: impl Into<ServiceId>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            _payload: PhantomData,
        }
    }

    pub fn topic(&self) -> &ServiceId {
        &self.topic
    }

    pub async fn announce(&self, payload: T) -> anyhow::Result<()> {
        self.bus
            .announce_instance(self.topic.clone(), Arc::new(payload))
            .await
    }
}

/// A parameter binding that resolves the [`EventBus`] and hands the method
/// an [`EventAnnouncer<T>`] for `topic`.
pub fn inject_event_announcer<T: Send + Sync + 'static>(topic: impl Into<ServiceId>) -> ParameterBinding {
    let topic = topic.into();
    ParameterBinding::of::<EventBus>()
        .transform(move |bus: Arc<EventBus>| EventAnnouncer::<T>::new(EventBus::clone(&bus), topic.clone()))
}

/// The built-in module binding a singleton [`EventBus`].
pub fn event_bus_module() -> Arc<ModuleDescriptor> {
    static MODULE: OnceLock<Arc<ModuleDescriptor>> = OnceLock::new();
    Arc::clone(MODULE.get_or_init(|| {
        ModuleDescriptor::builder(EVENT_BUS_MODULE)
            .component(ComponentDescriptor::from_fn(|_| async { Ok(EventBus::new()) }).singleton())
            .build()
    }))
}
