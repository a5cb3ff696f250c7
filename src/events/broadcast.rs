//! Subscriber fan-out for decoded events and connection-state transitions.
//!
//! Registries are explicit: subscribing hands back a `Subscription` handle
//! tied to its own channel, and disposal is either `unsubscribe()` or
//! dropping the handle (the registry prunes the dead channel on the next
//! publish). Publish order is delivery order for every subscriber.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvError, RecvTimeoutError, TryRecvError, TrySendError};

use crate::connection::state::ConnectionState;
use crate::events::event::Event;

pub type EventSubscription = Subscription<Event>;
pub type StateSubscription = Subscription<ConnectionState>;

/// A live subscription to a fan-out registry.
pub struct Subscription<T> {
    id: u64,
    receiver: Receiver<T>,
    registry: Arc<Mutex<FanoutInner<T>>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Remove this subscription from the registry.
    pub fn unsubscribe(self) {
        let mut inner = lock_registry(&self.registry);
        inner.subscribers.remove(&self.id);
    }
}

/// Fan-out over decoded events, bounded per subscriber.
///
/// A subscriber that cannot keep up (its queue is full at publish time) is
/// evicted rather than allowed to stall the connection loop.
pub struct EventBroadcaster {
    capacity: usize,
    inner: Arc<Mutex<FanoutInner<Event>>>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Arc::new(Mutex::new(FanoutInner::default())),
        }
    }

    pub fn subscribe(&self) -> EventSubscription {
        subscribe(&self.inner, Some(self.capacity))
    }

    pub fn publish(&self, event: Event) {
        publish(&self.inner, event, "event subscriber");
    }

    pub fn subscriber_count(&self) -> usize {
        lock_registry(&self.inner).subscribers.len()
    }
}

/// Fan-out over connection-state transitions, unbounded: state changes are
/// rare and observers must never miss one.
pub struct StateUpdates {
    inner: Arc<Mutex<FanoutInner<ConnectionState>>>,
}

impl StateUpdates {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FanoutInner::default())),
        }
    }

    pub fn subscribe(&self) -> StateSubscription {
        subscribe(&self.inner, None)
    }

    /// Subscribe, delivering `initial` as the first update when present.
    /// For publishers already settled in a state the new observer would
    /// otherwise never hear about.
    pub(crate) fn subscribe_with_initial(
        &self,
        initial: Option<ConnectionState>,
    ) -> StateSubscription {
        subscribe_with(&self.inner, None, initial)
    }

    pub fn publish(&self, state: ConnectionState) {
        publish(&self.inner, state, "state observer");
    }

    pub fn observer_count(&self) -> usize {
        lock_registry(&self.inner).subscribers.len()
    }
}

impl Default for StateUpdates {
    fn default() -> Self {
        Self::new()
    }
}

struct FanoutInner<T> {
    next_id: u64,
    subscribers: BTreeMap<u64, channel::Sender<T>>,
}

impl<T> Default for FanoutInner<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            subscribers: BTreeMap::new(),
        }
    }
}

fn lock_registry<T>(registry: &Arc<Mutex<FanoutInner<T>>>) -> MutexGuard<'_, FanoutInner<T>> {
    // The registry is a plain id->sender map; a poisoning panic cannot leave
    // it half-updated in a way that matters.
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

fn subscribe<T>(
    registry: &Arc<Mutex<FanoutInner<T>>>,
    capacity: Option<usize>,
) -> Subscription<T> {
    subscribe_with(registry, capacity, None)
}

fn subscribe_with<T>(
    registry: &Arc<Mutex<FanoutInner<T>>>,
    capacity: Option<usize>,
    initial: Option<T>,
) -> Subscription<T> {
    let mut inner = lock_registry(registry);
    let id = inner.next_id;
    inner.next_id = inner.next_id.saturating_add(1);
    let (sender, receiver) = match capacity {
        Some(bound) => channel::bounded(bound),
        None => channel::unbounded(),
    };
    if let Some(value) = initial {
        // Only this subscriber sees the seed; it is queued ahead of any
        // publish that follows.
        let _ = sender.try_send(value);
    }
    inner.subscribers.insert(id, sender);
    Subscription {
        id,
        receiver,
        registry: Arc::clone(registry),
    }
}

fn publish<T: Clone>(registry: &Arc<Mutex<FanoutInner<T>>>, value: T, kind: &str) {
    let mut inner = lock_registry(registry);
    let mut dropped = Vec::new();
    for (id, sender) in &inner.subscribers {
        match sender.try_send(value.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscriber = *id, "{kind} lagged, dropping subscription");
                dropped.push(*id);
            }
            Err(TrySendError::Disconnected(_)) => {
                dropped.push(*id);
            }
        }
    }
    for id in dropped {
        inner.subscribers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{ChannelId, UserId};

    fn typing(user: &str) -> Event {
        Event::TypingStart {
            channel_id: ChannelId::from("general"),
            user_id: UserId::from(user),
        }
    }

    #[test]
    fn delivers_events_in_publish_order() {
        let broadcaster = EventBroadcaster::new(8);
        let sub = broadcaster.subscribe();

        broadcaster.publish(typing("a"));
        broadcaster.publish(typing("b"));

        assert_eq!(sub.recv().unwrap(), typing("a"));
        assert_eq!(sub.recv().unwrap(), typing("b"));
    }

    #[test]
    fn multiple_subscribers_each_get_every_event() {
        let broadcaster = EventBroadcaster::new(8);
        let first = broadcaster.subscribe();
        let second = broadcaster.subscribe();

        broadcaster.publish(typing("a"));

        assert_eq!(first.recv().unwrap(), typing("a"));
        assert_eq!(second.recv().unwrap(), typing("a"));
    }

    #[test]
    fn unsubscribe_removes_from_registry() {
        let broadcaster = EventBroadcaster::new(8);
        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn lagging_subscriber_is_evicted() {
        let broadcaster = EventBroadcaster::new(1);
        let _sub = broadcaster.subscribe();

        broadcaster.publish(typing("a"));
        broadcaster.publish(typing("b"));

        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn dropped_subscription_is_pruned_on_publish() {
        let broadcaster = EventBroadcaster::new(8);
        let sub = broadcaster.subscribe();
        drop(sub);

        broadcaster.publish(typing("a"));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn seeded_subscription_sees_the_seed_first_and_alone() {
        let updates = StateUpdates::new();
        let plain = updates.subscribe();
        let seeded = updates.subscribe_with_initial(Some(ConnectionState::Connecting));

        assert_eq!(seeded.try_recv().unwrap(), ConnectionState::Connecting);
        assert!(plain.try_recv().is_err());

        updates.publish(ConnectionState::Uninitialized);
        assert_eq!(seeded.try_recv().unwrap(), ConnectionState::Uninitialized);
        assert_eq!(plain.try_recv().unwrap(), ConnectionState::Uninitialized);
    }

    #[test]
    fn state_updates_never_drop_observers() {
        let updates = StateUpdates::new();
        let sub = updates.subscribe();

        for _ in 0..1000 {
            updates.publish(ConnectionState::Connecting);
        }
        assert_eq!(updates.observer_count(), 1);
        assert_eq!(sub.try_recv().unwrap(), ConnectionState::Connecting);
    }
}
