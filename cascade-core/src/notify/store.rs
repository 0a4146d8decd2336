//! Property Store
//!
//! A [`PropertyStore`] holds the named values of one instance and drives the
//! [`NotificationEngine`] around every write. Types opt in by implementing
//! [`Observable`], which also carries their declarations.
//!
//! # Writes
//!
//! `set` announces "changing" (for the name and its echoes), writes the
//! slot, then announces "changed" and runs qualifying handlers. Every write
//! dispatches, including one that stores an equal value; the handler
//! conditions decide what reacts to that.
//!
//! The slot lock is only held for the write itself. Listeners and handlers
//! run without it and may read or write the store.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::args::MemberKind;
use super::declare::Declarations;
use super::engine::NotificationEngine;
use super::index::DependencyIndex;
use super::subscriber::{Notifier, PropertyEvent, Subscription};
use crate::config::EngineConfig;
use crate::error::{DeclarationError, StoreError};

/// Unique identifier for a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A type whose values live in a [`PropertyStore`] and whose dependents are
/// declared once per type.
pub trait Observable: Send + Sync + Sized + 'static {
    /// The store holding this instance's values.
    fn store(&self) -> &PropertyStore<Self>;

    /// Register the type's derived properties and handlers.
    ///
    /// Called once per process, the first time an index for the type is
    /// needed.
    fn declare(decl: &mut Declarations<Self>) -> Result<(), DeclarationError>;

    fn get_value<V: DeserializeOwned>(&self, name: &str) -> Result<V, StoreError> {
        self.store().get(name)
    }

    fn set_value<V: Serialize>(&self, name: &str, value: V) -> Result<(), StoreError> {
        self.store().set(self, name, value)
    }
}

/// Named value slots of one instance.
pub struct PropertyStore<T> {
    id: InstanceId,
    slots: RwLock<IndexMap<String, Value>>,
    notifier: Notifier,
    index: Arc<DependencyIndex<T>>,
    config: EngineConfig,
}

impl<T: Observable> PropertyStore<T> {
    /// Create an empty store.
    ///
    /// Resolves `T`'s dependency index, so malformed declarations are
    /// reported here rather than on the first write.
    pub fn new() -> Result<Self, DeclarationError> {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, DeclarationError> {
        Ok(Self {
            id: InstanceId::new(),
            slots: RwLock::new(IndexMap::new()),
            notifier: Notifier::new(),
            index: DependencyIndex::of()?,
            config,
        })
    }

    /// Write `value` into slot `name` and propagate the change.
    ///
    /// On [`StoreError::Dependents`] the value has been written.
    pub fn set<V: Serialize>(&self, instance: &T, name: &str, value: V) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            name: name.to_owned(),
            source,
        })?;
        self.set_raw(instance, name, value)
    }

    pub fn set_raw(&self, instance: &T, name: &str, value: Value) -> Result<(), StoreError> {
        debug_assert!(
            std::ptr::eq(instance.store(), self),
            "instance does not own this store"
        );

        let engine = self.engine();
        let before = self.get_raw(name);
        engine.on_value_changing(name, &before, &value);

        let old = self
            .slots
            .write()
            .insert(name.to_owned(), value.clone())
            .unwrap_or(Value::Null);

        engine.on_value_changed(instance, name, MemberKind::Property, &old, &value)?;
        Ok(())
    }

    /// Re-announce `name` as if it had been written with its current value.
    ///
    /// Echoes and handlers are dispatched exactly as for a write; handler
    /// arguments carry the current value as both old and new.
    pub fn raise(&self, instance: &T, name: &str) -> Result<(), StoreError> {
        self.raise_member(instance, name, MemberKind::Property)
    }

    /// Like [`raise`](Self::raise), for a field or method that changed
    /// outside the store.
    pub fn raise_member(
        &self,
        instance: &T,
        name: &str,
        kind: MemberKind,
    ) -> Result<(), StoreError> {
        let engine = self.engine();
        let current = self.read(instance, name);

        engine.on_value_changing(name, &current, &current);
        engine.on_value_changed(instance, name, kind, &current, &current)?;
        Ok(())
    }

    /// Read a slot or a declared derived property. Unknown names read as null.
    pub fn read(&self, instance: &T, name: &str) -> Value {
        self.index
            .read(instance, name)
            .unwrap_or_else(|| self.get_raw(name))
    }

    fn engine(&self) -> NotificationEngine<'_, T> {
        NotificationEngine::new(self.id, &self.index, &self.notifier, self.config)
    }
}

impl<T> PropertyStore<T> {
    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    pub fn index(&self) -> &DependencyIndex<T> {
        &self.index
    }

    /// Read and decode slot `name`. A missing slot decodes from null.
    pub fn get<V: DeserializeOwned>(&self, name: &str) -> Result<V, StoreError> {
        let slots = self.slots.read();
        let value = slots.get(name).unwrap_or(&Value::Null);
        V::deserialize(value).map_err(|source| StoreError::Decode {
            name: name.to_owned(),
            source,
        })
    }

    pub fn get_raw(&self, name: &str) -> Value {
        self.slots.read().get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.read().contains_key(name)
    }

    /// Names of all written slots, in first-write order.
    pub fn names(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Listen to "changing" and "changed" announcements.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(PropertyEvent<'_>) + Send + Sync + 'static,
    {
        self.notifier.subscribe(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifier.subscriber_count()
    }
}

impl<T> fmt::Debug for PropertyStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyStore")
            .field("id", &self.id)
            .field("type_name", &self.index.type_name())
            .field("slots", &*self.slots.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::notify::{Condition, Handler, Phase};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// `Doubled` echoes `Count`; `clamp` writes `Count` back from its own
    /// handler; `reject` fails for negative values.
    struct Counter {
        store: PropertyStore<Counter>,
        clamps: AtomicUsize,
    }

    impl Counter {
        fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        fn with_config(config: EngineConfig) -> Self {
            Self {
                store: PropertyStore::with_config(config).unwrap(),
                clamps: AtomicUsize::new(0),
            }
        }

        fn count(&self) -> i64 {
            self.get_value("Count").unwrap_or_default()
        }
    }

    impl Observable for Counter {
        fn store(&self) -> &PropertyStore<Self> {
            &self.store
        }

        fn declare(decl: &mut Declarations<Self>) -> Result<(), DeclarationError> {
            decl.property("Doubled", |c: &Counter| json!(c.count() * 2))?
                .receives_from(["Count"])?;

            decl.handler(
                "clamp",
                Handler::zero_arg(|c: &Counter| {
                    c.clamps.fetch_add(1, Ordering::SeqCst);
                    if c.count() > 100 {
                        c.set_value("Count", 100)?;
                    }
                    Ok(())
                }),
            )?
            .when(Condition::OnlyIfDifferent)
            .receives_from(["Count"])?;

            decl.handler(
                "reject",
                Handler::with_args(|_: &Counter, args| {
                    if args.new_as::<i64>()? < 0 {
                        return Err("negative count".into());
                    }
                    Ok(())
                }),
            )?
            .receives_from(["Count"])?;
            Ok(())
        }
    }

    fn record(counter: &Counter) -> (Subscription, Arc<Mutex<Vec<(Phase, String)>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = counter
            .store()
            .subscribe(move |e| sink.lock().push((e.phase, e.name.to_owned())));
        (subscription, events)
    }

    #[test]
    fn set_and_get_round_trip() {
        let counter = Counter::new();
        assert_eq!(counter.count(), 0);
        assert!(!counter.store.contains("Count"));

        counter.set_value("Count", 5).unwrap();

        assert_eq!(counter.count(), 5);
        assert_eq!(counter.store.get_raw("Count"), json!(5));
        assert_eq!(counter.store.read(&counter, "Doubled"), json!(10));
        assert_eq!(counter.store.names(), vec!["Count"]);
    }

    #[test]
    fn write_announces_source_and_echo() {
        let counter = Counter::new();
        let (_subscription, events) = record(&counter);

        counter.set_value("Count", 3).unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                (Phase::Changing, "Count".to_owned()),
                (Phase::Changing, "Doubled".to_owned()),
                (Phase::Changed, "Count".to_owned()),
                (Phase::Changed, "Doubled".to_owned()),
            ]
        );
    }

    #[test]
    fn handler_failure_keeps_written_value() {
        let counter = Counter::new();

        let err = counter.set_value("Count", -4).unwrap_err();

        assert!(err.value_written());
        assert!(matches!(&err, StoreError::Dependents(d) if d.handler_names().eq(["reject"])));
        assert_eq!(counter.count(), -4);
    }

    #[test]
    fn log_policy_reports_success() {
        let counter = Counter::with_config(EngineConfig {
            failure_policy: FailurePolicy::Log,
        });

        counter.set_value("Count", -1).unwrap();
        assert_eq!(counter.count(), -1);
    }

    #[test]
    fn encode_failure_leaves_store_untouched() {
        let counter = Counter::new();
        let (_subscription, events) = record(&counter);

        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        let err = counter.set_value("Count", bad).unwrap_err();

        assert!(matches!(err, StoreError::Encode { .. }));
        assert!(!err.value_written());
        assert!(!counter.store.contains("Count"));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn decode_failure_is_reported() {
        let counter = Counter::new();
        counter.set_value("Count", 1).unwrap();

        let err = counter.get_value::<String>("Count").unwrap_err();
        assert!(matches!(err, StoreError::Decode { name, .. } if name == "Count"));
    }

    #[test]
    fn handler_write_back_does_not_redispatch_itself() {
        let counter = Counter::new();

        counter.set_value("Count", 250).unwrap();

        assert_eq!(counter.count(), 100);
        // The nested write from `clamp` is stored and announced but does not
        // re-enter `clamp`.
        assert_eq!(counter.clamps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn raise_dispatches_with_current_value() {
        let counter = Counter::new();
        counter.set_value("Count", 8).unwrap();
        let clamps = counter.clamps.load(Ordering::SeqCst);
        let (_subscription, events) = record(&counter);

        counter.store.raise(&counter, "Count").unwrap();

        assert_eq!(events.lock().len(), 4);
        // Old and new are equal, so the OnlyIfDifferent clamp does not run.
        assert_eq!(counter.clamps.load(Ordering::SeqCst), clamps);
        assert_eq!(counter.count(), 8);
    }

    #[test]
    fn unsubscribed_listener_is_silent() {
        let counter = Counter::new();
        let (subscription, events) = record(&counter);

        drop(subscription);
        counter.set_value("Count", 1).unwrap();

        assert!(events.lock().is_empty());
        assert_eq!(counter.store.subscriber_count(), 0);
    }
}
