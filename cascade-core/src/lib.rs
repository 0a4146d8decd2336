//! Cascade Core
//!
//! This crate provides declarative change propagation for named values.
//! It implements:
//!
//! - Per-type dependency declarations, indexed once and cached
//! - Property stores that announce every write and run dependent handlers
//! - Aggregated state graphs where a node's value follows its parents
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `notify`: Declarations, dependency index, notification engine and stores
//! - `graph`: Parent/child state nodes with ascending or descending folds
//! - `config`: Runtime settings for both
//! - `error`: Error types shared across the crate
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::error::DeclarationError;
//! use cascade_core::notify::{Declarations, Handler, Observable, PropertyStore, Value};
//!
//! struct Order {
//!     store: PropertyStore<Order>,
//! }
//!
//! impl Observable for Order {
//!     fn store(&self) -> &PropertyStore<Self> {
//!         &self.store
//!     }
//!
//!     fn declare(decl: &mut Declarations<Self>) -> Result<(), DeclarationError> {
//!         // `Total` is announced whenever `Price` or `Quantity` is.
//!         decl.property("Total", |order| order.total())?
//!             .receives_from(["Price", "Quantity"])?;
//!
//!         decl.handler("audit", Handler::zero_arg(|_order: &Order| Ok(())))?
//!             .receives_from(["Price"])?;
//!         Ok(())
//!     }
//! }
//!
//! let order = Order { store: PropertyStore::new()? };
//! order.set_value("Price", 12)?;
//! // Announces "Price" and "Total", then runs `audit`.
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod notify;
