//! Listeners for change announcements.
//!
//! A [`Notifier`] is the observable surface of a store or state node: it
//! announces "changing" and "changed" events carrying the literal property
//! name. Listeners are registered with [`Notifier::subscribe`], which hands
//! back a [`Subscription`] that unsubscribes when dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Unique identifier for a subscriber.
///
/// Each listener gets its own ID when it subscribes. The ID is what a
/// [`Subscription`] uses to remove exactly its own listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an announcement precedes or follows a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Changing,
    Changed,
}

/// A single announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyEvent<'a> {
    pub phase: Phase,
    /// Name of the property the announcement is for.
    pub name: &'a str,
}

impl<'a> PropertyEvent<'a> {
    pub fn changing(name: &'a str) -> Self {
        Self { phase: Phase::Changing, name }
    }

    pub fn changed(name: &'a str) -> Self {
        Self { phase: Phase::Changed, name }
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.phase == Phase::Changed && self.name == name
    }
}

type Listener = Arc<dyn Fn(PropertyEvent<'_>) + Send + Sync>;
type Listeners = RwLock<Vec<(SubscriberId, Listener)>>;

/// Ordered list of listeners.
///
/// Listeners run in subscription order. They are called from a snapshot
/// taken with the lock released, so a listener may subscribe, unsubscribe
/// or trigger further announcements.
#[derive(Default)]
pub struct Notifier {
    listeners: Arc<Listeners>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned
    /// subscription is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(PropertyEvent<'_>) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.listeners.write().push((id, Arc::new(listener)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Announce an event to every listener.
    pub fn announce(&self, event: PropertyEvent<'_>) {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }

    /// Get the number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Owned registration of a listener.
///
/// Dropping the subscription removes the listener. If the notifier is gone
/// already, dropping does nothing.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the listener is still registered with a live notifier.
    pub fn is_active(&self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.read().iter().any(|(id, _)| *id == self.id))
    }

    /// Keep the listener registered for the lifetime of the notifier.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn listeners_receive_events_in_order() {
        let notifier = Notifier::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let first = {
            let seen = seen.clone();
            notifier.subscribe(move |e| seen.lock().push(format!("a:{}", e.name)))
        };
        let second = {
            let seen = seen.clone();
            notifier.subscribe(move |e| seen.lock().push(format!("b:{}", e.name)))
        };

        notifier.announce(PropertyEvent::changed("X"));

        assert_eq!(*seen.lock(), vec!["a:X", "b:X"]);
        drop((first, second));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let notifier = Notifier::new();
        let count = Arc::new(AtomicI32::new(0));

        let subscription = {
            let count = count.clone();
            notifier.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        notifier.announce(PropertyEvent::changed("X"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(subscription.is_active());

        drop(subscription);
        notifier.announce(PropertyEvent::changed("X"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let notifier = Notifier::new();
        let count = Arc::new(AtomicI32::new(0));

        {
            let count = count.clone();
            notifier
                .subscribe(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .detach();
        }

        notifier.announce(PropertyEvent::changing("X"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_outliving_notifier_is_inert() {
        let notifier = Notifier::new();
        let subscription = notifier.subscribe(|_| {});

        drop(notifier);

        assert!(!subscription.is_active());
        drop(subscription);
    }

    #[test]
    fn listener_may_unsubscribe_during_announce() {
        let notifier = Arc::new(Notifier::new());
        let slot: Arc<parking_lot::Mutex<Option<Subscription>>> = Arc::default();

        let subscription = {
            let slot = slot.clone();
            notifier.subscribe(move |_| {
                slot.lock().take();
            })
        };
        *slot.lock() = Some(subscription);

        notifier.announce(PropertyEvent::changed("X"));
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
