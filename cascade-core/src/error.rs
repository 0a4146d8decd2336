//! Error types.
//!
//! Errors are split by who is responsible for them:
//!
//! - [`DeclarationError`]: a type's declarations are malformed. Raised while
//!   the dependency index is built, before any dispatch happens.
//! - [`GraphError`]: a structural edit of a state graph was rejected. The
//!   graph is left exactly as it was.
//! - [`DispatchError`]: one or more dependent handlers failed while a change
//!   was being propagated. Every qualifying handler was still attempted.
//! - [`StoreError`]: the outcome of a store read or write, separating a
//!   failed write from failed reactions to a successful write.

use std::fmt;

use thiserror::Error;

use crate::graph::NodeId;

/// Error returned by a handler routine.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A declaration could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
    #[error("source name must not be empty")]
    EmptySourceName,

    #[error("{kind} name must not be empty")]
    EmptyName { kind: &'static str },

    #[error("property `{0}` is declared more than once")]
    DuplicateProperty(String),

    #[error("`{target}` receives announcements from `{origin}` but is not a declared property")]
    UnknownProperty { target: String, origin: String },

    #[error(
        "handler `{handler}` is registered twice for `{origin}` with a different condition or shape"
    )]
    ConflictingHandler { handler: String, origin: String },
}

/// A structural change to a state graph was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node {0} cannot be linked to itself")]
    SelfReference(NodeId),

    #[error("node {other} is already a parent of node {node}")]
    AlreadyParent { node: NodeId, other: NodeId },

    #[error("node {other} is already a child of node {node}")]
    AlreadyChild { node: NodeId, other: NodeId },

    #[error("linking {parent} as a parent of {child} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },

    #[error("node {0} does not exist in this graph")]
    UnknownNode(NodeId),

    #[error("node {0} belongs to a different graph")]
    ForeignNode(NodeId),
}

/// A single handler that failed during dispatch.
#[derive(Debug)]
pub struct HandlerFailure {
    /// Name the handler was declared with.
    pub handler: String,
    /// Source value whose change triggered the handler.
    pub source: String,
    pub error: HandlerError,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (on {}): {}", self.handler, self.source, self.error)
    }
}

/// Aggregate of all handler failures for one change.
#[derive(Debug, Error)]
#[error("{} dependent handler(s) failed: {}", .failures.len(), DisplayFailures(.failures))]
pub struct DispatchError {
    pub failures: Vec<HandlerFailure>,
}

impl DispatchError {
    /// Names of the failed handlers, in the order they were attempted.
    pub fn handler_names(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.handler.as_str())
    }
}

struct DisplayFailures<'a>(&'a [HandlerFailure]);

impl fmt::Display for DisplayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

/// Error returned by store reads and writes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The value could not be converted for storage; nothing was written.
    #[error("failed to encode value for `{name}`: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored value could not be converted to the requested type.
    #[error("failed to decode value of `{name}`: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// The write succeeded but dependent handlers failed.
    #[error(transparent)]
    Dependents(#[from] DispatchError),
}

impl StoreError {
    /// Whether the value was written despite this error.
    pub fn value_written(&self) -> bool {
        matches!(self, StoreError::Dependents(_))
    }
}
