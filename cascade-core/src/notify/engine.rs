//! Notification Engine
//!
//! The engine turns the store's two low-level signals into announcements
//! and handler invocations:
//!
//! 1. *changing*: announce `name`, then every property echoing `name`.
//!
//! 2. *changed*: announce `name`, then every property echoing `name`, then
//!    run each handler edge of `name` whose condition holds for the old/new
//!    pair.
//!
//! Echoes are one hop. Re-announcing `Total` because `Price` changed does
//! not look up what depends on `Total`.
//!
//! A failing handler does not stop the ones after it. Failures are collected
//! and handled according to the configured [`FailurePolicy`] once every
//! qualifying edge has been attempted.

use serde_json::Value;
use tracing::{error, trace, warn};

use super::args::{ChangeArgs, MemberKind};
use super::context::DispatchContext;
use super::index::DependencyIndex;
use super::store::InstanceId;
use super::subscriber::{Notifier, PropertyEvent};
use crate::config::{EngineConfig, FailurePolicy};
use crate::error::{DispatchError, HandlerFailure};

/// Dispatches the changes of one instance.
pub struct NotificationEngine<'a, T> {
    instance_id: InstanceId,
    index: &'a DependencyIndex<T>,
    notifier: &'a Notifier,
    config: EngineConfig,
}

impl<'a, T> NotificationEngine<'a, T> {
    pub fn new(
        instance_id: InstanceId,
        index: &'a DependencyIndex<T>,
        notifier: &'a Notifier,
        config: EngineConfig,
    ) -> Self {
        Self {
            instance_id,
            index,
            notifier,
            config,
        }
    }

    /// Called right before the slot `name` is written.
    pub fn on_value_changing(&self, name: &str, old: &Value, new: &Value) {
        trace!(instance = %self.instance_id, name, %old, %new, "value changing");

        self.notifier.announce(PropertyEvent::changing(name));
        for echo in self.index.echoes(name) {
            self.notifier.announce(PropertyEvent::changing(echo));
        }
    }

    /// Called right after the slot `name` was written.
    pub fn on_value_changed(
        &self,
        instance: &T,
        name: &str,
        kind: MemberKind,
        old: &Value,
        new: &Value,
    ) -> Result<(), DispatchError> {
        trace!(instance = %self.instance_id, name, %old, %new, "value changed");

        self.notifier.announce(PropertyEvent::changed(name));
        for echo in self.index.echoes(name) {
            self.notifier.announce(PropertyEvent::changed(echo));
        }

        let edges = self.index.handlers(name);
        if edges.is_empty() {
            return Ok(());
        }

        let Some(_ctx) = DispatchContext::enter(self.instance_id, name) else {
            warn!(
                instance = %self.instance_id,
                name,
                "skipping handlers for a write made by one of its own handlers"
            );
            return Ok(());
        };

        let args = ChangeArgs::new(instance, name, kind, old, new);
        let are_different = args.are_different();
        let mut failures = Vec::new();

        for edge in edges {
            if !edge.condition.qualifies(are_different) {
                trace!(handler = &*edge.name, condition = ?edge.condition, "handler not qualified");
                continue;
            }

            if let Err(error) = edge.handler.invoke(instance, &args) {
                failures.push(HandlerFailure {
                    handler: edge.name.to_string(),
                    source: name.to_owned(),
                    error,
                });
            }
        }

        self.settle(failures)
    }

    fn settle(&self, failures: Vec<HandlerFailure>) -> Result<(), DispatchError> {
        if failures.is_empty() {
            return Ok(());
        }

        match self.config.failure_policy {
            FailurePolicy::Propagate => Err(DispatchError { failures }),
            FailurePolicy::Log => {
                for failure in &failures {
                    error!(
                        instance = %self.instance_id,
                        handler = %failure.handler,
                        source = %failure.source,
                        error = %failure.error,
                        "dependent handler failed"
                    );
                }
                Ok(())
            }
        }
    }
}
