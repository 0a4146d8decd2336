//! Aggregated State Graph
//!
//! This module implements a graph of nodes whose effective value is derived
//! from their own local value and the values of their parents.
//!
//! # Overview
//!
//! The graph is a set of parent/child edges where:
//!
//! - Nodes hold an optional local value and a [`Strategy`]
//! - Edges point from parent to child: a child's value takes its parents
//!   into account, never the other way round
//!
//! When a node's effective value changes it announces [`VALUE`], and every
//! child recomputes its own value in response.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena owned by the [`StateGraph`]. Edges are node IDs,
//!    so neither end keeps the other alive.
//!
//! 2. The arena is indexed by node ID for O(1) lookups.
//!
//! 3. Both directions are stored on every edge, and both are updated under
//!    the locks of the two nodes involved.

mod node;
mod state;

pub use node::{NodeId, Strategy};
pub use state::{StateGraph, StateNode, VALUE};
