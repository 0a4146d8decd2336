//! Declarative Change Notification
//!
//! This module lets a type declare, once, what must react when one of its
//! named values changes, and dispatches those reactions on every write.
//!
//! # Concepts
//!
//! ## Stores
//!
//! A [`PropertyStore`] holds an instance's named values. Writing a value
//! announces "changing" before and "changed" after the write, each carrying
//! the literal property name.
//!
//! ## Echoes
//!
//! A derived property (one computed from other values, with no slot of its
//! own) can declare that it *receives announcements from* a source. Whenever
//! the source is announced, the derived property is announced too.
//!
//! ## Handlers
//!
//! A handler routine can declare that it *receives values from* a source,
//! under a [`Condition`] comparing the old and new value. Qualifying
//! handlers run after the "changed" announcements, in declaration order.
//!
//! # Implementation Notes
//!
//! Declarations are collected by [`Observable::declare`] into a
//! [`DependencyIndex`], built once per type and cached process-wide. The
//! [`NotificationEngine`] consults that index on every write.

mod args;
mod context;
mod declare;
mod engine;
mod index;
mod store;
mod subscriber;

pub use args::{ChangeArgs, MemberKind};
pub use context::DispatchContext;
pub use declare::{
    Condition, Declarations, Handler, HandlerDecl, HandlerEdge, HandlerShape, PropertyDecl,
    SourceName,
};
pub use engine::NotificationEngine;
pub use index::DependencyIndex;
pub use store::{InstanceId, Observable, PropertyStore};
pub use subscriber::{Notifier, Phase, PropertyEvent, SubscriberId, Subscription};

pub use serde_json::Value;
