//! Declarations
//!
//! A type states once, in [`Observable::declare`](super::Observable::declare),
//! which of its derived properties echo a source value and which handler
//! routines react to it:
//!
//! ```rust,ignore
//! fn declare(decl: &mut Declarations<Self>) -> Result<(), DeclarationError> {
//!     decl.property("Total", |order: &Order| order.total().into())?
//!         .receives_from(["Price", "Quantity"])?;
//!
//!     decl.handler("recalculate", Handler::zero_arg(|order: &Order| order.recalculate()))?
//!         .when(Condition::OnlyIfDifferent)
//!         .receives_from(["Price"])?;
//!     Ok(())
//! }
//! ```
//!
//! Declaration order is kept: edges for one source fire in the order they
//! were declared.

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::args::ChangeArgs;
use crate::error::{DeclarationError, HandlerError};

/// A validated source value name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceName(String);

impl SourceName {
    /// Fails if the name is empty or whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, DeclarationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DeclarationError::EmptySourceName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// When a handler edge fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    OnlyIfDifferent,
    OnlyIfEqual,
}

impl Condition {
    /// Whether a change with the given old/new comparison qualifies.
    pub fn qualifies(self, are_different: bool) -> bool {
        match self {
            Condition::Always => true,
            Condition::OnlyIfDifferent => are_different,
            Condition::OnlyIfEqual => !are_different,
        }
    }
}

/// Callback shape of a handler, fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerShape {
    ZeroArg,
    WithArgs,
}

type ZeroArgFn<T> = dyn Fn(&T) -> Result<(), HandlerError> + Send + Sync;
type WithArgsFn<T> = dyn Fn(&T, &ChangeArgs<'_, T>) -> Result<(), HandlerError> + Send + Sync;

/// A handler routine.
pub enum Handler<T> {
    ZeroArg(Arc<ZeroArgFn<T>>),
    WithArgs(Arc<WithArgsFn<T>>),
}

impl<T> Handler<T> {
    pub fn zero_arg<F>(f: F) -> Self
    where
        F: Fn(&T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Handler::ZeroArg(Arc::new(f))
    }

    pub fn with_args<F>(f: F) -> Self
    where
        F: Fn(&T, &ChangeArgs<'_, T>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Handler::WithArgs(Arc::new(f))
    }

    pub fn shape(&self) -> HandlerShape {
        match self {
            Handler::ZeroArg(_) => HandlerShape::ZeroArg,
            Handler::WithArgs(_) => HandlerShape::WithArgs,
        }
    }

    /// Call the handler with the arguments its shape asks for.
    pub fn invoke(&self, instance: &T, args: &ChangeArgs<'_, T>) -> Result<(), HandlerError> {
        match self {
            Handler::ZeroArg(f) => f(instance),
            Handler::WithArgs(f) => f(instance, args),
        }
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        match self {
            Handler::ZeroArg(f) => Handler::ZeroArg(Arc::clone(f)),
            Handler::WithArgs(f) => Handler::WithArgs(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

/// A handler attached to one source value.
#[derive(Debug)]
pub struct HandlerEdge<T> {
    pub name: Arc<str>,
    pub condition: Condition,
    pub handler: Handler<T>,
}

impl<T> Clone for HandlerEdge<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            condition: self.condition,
            handler: self.handler.clone(),
        }
    }
}

pub(crate) type Getter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
pub(crate) type HandlerEdges<T> = SmallVec<[HandlerEdge<T>; 2]>;

/// Collects a type's declarations.
pub struct Declarations<T> {
    pub(crate) properties: IndexMap<String, Getter<T>>,
    pub(crate) echoes: IndexMap<String, IndexSet<String>>,
    pub(crate) handlers: IndexMap<String, HandlerEdges<T>>,
}

impl<T> Declarations<T> {
    pub fn new() -> Self {
        Self {
            properties: IndexMap::new(),
            echoes: IndexMap::new(),
            handlers: IndexMap::new(),
        }
    }

    /// Declare a readable derived property.
    pub fn property<F>(
        &mut self,
        name: &str,
        getter: F,
    ) -> Result<PropertyDecl<'_, T>, DeclarationError>
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        check_name("property", name)?;
        if self.properties.contains_key(name) {
            return Err(DeclarationError::DuplicateProperty(name.to_owned()));
        }
        self.properties.insert(name.to_owned(), Arc::new(getter));

        Ok(PropertyDecl {
            decl: self,
            name: name.to_owned(),
        })
    }

    /// Make an already declared property re-announce when any of `sources`
    /// changes. The property may be declared before or after this call.
    pub fn echo<I, S>(&mut self, target: &str, sources: I) -> Result<&mut Self, DeclarationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        check_name("property", target)?;
        for source in sources {
            let source = SourceName::new(source.as_ref())?;
            self.echoes
                .entry(source.into_string())
                .or_default()
                .insert(target.to_owned());
        }
        Ok(self)
    }

    /// Declare a handler routine.
    pub fn handler(
        &mut self,
        name: &str,
        handler: Handler<T>,
    ) -> Result<HandlerDecl<'_, T>, DeclarationError> {
        check_name("handler", name)?;
        Ok(HandlerDecl {
            decl: self,
            name: Arc::from(name),
            condition: Condition::Always,
            handler,
        })
    }

    fn add_handler_edge(
        &mut self,
        source: SourceName,
        edge: HandlerEdge<T>,
    ) -> Result<(), DeclarationError> {
        let edges = self.handlers.entry(source.as_str().to_owned()).or_default();

        if let Some(existing) = edges.iter().find(|e| e.name == edge.name) {
            if existing.condition == edge.condition
                && existing.handler.shape() == edge.handler.shape()
            {
                return Ok(());
            }
            return Err(DeclarationError::ConflictingHandler {
                handler: edge.name.to_string(),
                origin: source.into_string(),
            });
        }

        edges.push(edge);
        Ok(())
    }

    /// Check that every echo target is a declared property.
    pub(crate) fn validate(&self) -> Result<(), DeclarationError> {
        for (source, targets) in &self.echoes {
            if let Some(target) = targets.iter().find(|t| !self.properties.contains_key(*t)) {
                return Err(DeclarationError::UnknownProperty {
                    target: target.clone(),
                    origin: source.clone(),
                });
            }
        }
        Ok(())
    }
}

impl<T> Default for Declarations<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(kind: &'static str, name: &str) -> Result<(), DeclarationError> {
    if name.trim().is_empty() {
        return Err(DeclarationError::EmptyName { kind });
    }
    Ok(())
}

/// A property being declared.
pub struct PropertyDecl<'a, T> {
    decl: &'a mut Declarations<T>,
    name: String,
}

impl<T> PropertyDecl<'_, T> {
    /// Re-announce this property whenever one of `sources` changes.
    pub fn receives_from<I, S>(self, sources: I) -> Result<(), DeclarationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.decl.echo(&self.name, sources)?;
        Ok(())
    }
}

/// A handler being declared.
pub struct HandlerDecl<'a, T> {
    decl: &'a mut Declarations<T>,
    name: Arc<str>,
    condition: Condition,
    handler: Handler<T>,
}

impl<T> HandlerDecl<'_, T> {
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Invoke this handler whenever one of `sources` changes and the
    /// condition holds.
    pub fn receives_from<I, S>(self, sources: I) -> Result<(), DeclarationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for source in sources {
            let source = SourceName::new(source.as_ref())?;
            let edge = HandlerEdge {
                name: Arc::clone(&self.name),
                condition: self.condition,
                handler: self.handler.clone(),
            };
            self.decl.add_handler_edge(source, edge)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Item;

    fn noop() -> Handler<Item> {
        Handler::zero_arg(|_| Ok(()))
    }

    #[test]
    fn source_name_rejects_blank() {
        assert_eq!(SourceName::new(""), Err(DeclarationError::EmptySourceName));
        assert_eq!(SourceName::new("  \t"), Err(DeclarationError::EmptySourceName));
        assert_eq!(SourceName::new("Price").unwrap().as_str(), "Price");
    }

    #[test]
    fn condition_gating() {
        assert!(Condition::Always.qualifies(true));
        assert!(Condition::Always.qualifies(false));
        assert!(Condition::OnlyIfDifferent.qualifies(true));
        assert!(!Condition::OnlyIfDifferent.qualifies(false));
        assert!(!Condition::OnlyIfEqual.qualifies(true));
        assert!(Condition::OnlyIfEqual.qualifies(false));
    }

    #[test]
    fn blank_source_fails_at_declaration() {
        let mut decl = Declarations::<Item>::new();
        let err = decl
            .property("Total", |_| json!(0))
            .unwrap()
            .receives_from(["Price", " "])
            .unwrap_err();
        assert_eq!(err, DeclarationError::EmptySourceName);

        let err = decl.handler("h", noop()).unwrap().receives_from([""]).unwrap_err();
        assert_eq!(err, DeclarationError::EmptySourceName);
    }

    #[test]
    fn blank_names_fail() {
        let mut decl = Declarations::<Item>::new();
        assert!(matches!(
            decl.property("", |_| Value::Null),
            Err(DeclarationError::EmptyName { kind: "property" })
        ));
        assert!(matches!(
            decl.handler(" ", noop()),
            Err(DeclarationError::EmptyName { kind: "handler" })
        ));
    }

    #[test]
    fn duplicate_property_is_rejected() {
        let mut decl = Declarations::<Item>::new();
        decl.property("Total", |_| json!(1)).unwrap();
        assert!(matches!(
            decl.property("Total", |_| json!(2)),
            Err(DeclarationError::DuplicateProperty(name)) if name == "Total"
        ));
    }

    #[test]
    fn identical_handler_edges_collapse() {
        let mut decl = Declarations::<Item>::new();
        decl.handler("h", noop()).unwrap().receives_from(["A", "A"]).unwrap();
        decl.handler("h", noop()).unwrap().receives_from(["A"]).unwrap();

        assert_eq!(decl.handlers["A"].len(), 1);
    }

    #[test]
    fn conflicting_handler_is_rejected() {
        let mut decl = Declarations::<Item>::new();
        decl.handler("h", noop()).unwrap().receives_from(["A"]).unwrap();

        let err = decl
            .handler("h", noop())
            .unwrap()
            .when(Condition::OnlyIfEqual)
            .receives_from(["A"])
            .unwrap_err();
        assert_eq!(
            err,
            DeclarationError::ConflictingHandler {
                handler: "h".into(),
                origin: "A".into()
            }
        );
        assert_eq!(
            err.to_string(),
            "handler `h` is registered twice for `A` with a different condition or shape"
        );

        let err = decl
            .handler("h", Handler::with_args(|_, _| Ok(())))
            .unwrap()
            .receives_from(["A"])
            .unwrap_err();
        assert!(matches!(err, DeclarationError::ConflictingHandler { .. }));
    }

    #[test]
    fn echo_to_undeclared_property_fails_validation() {
        let mut decl = Declarations::<Item>::new();
        decl.echo("Missing", ["A"]).unwrap();

        assert_eq!(
            decl.validate(),
            Err(DeclarationError::UnknownProperty {
                target: "Missing".into(),
                origin: "A".into()
            })
        );

        decl.property("Missing", |_| Value::Null).unwrap();
        assert_eq!(decl.validate(), Ok(()));
    }

    #[test]
    fn repeated_annotations_accumulate_in_order() {
        let mut decl = Declarations::<Item>::new();
        decl.property("B", |_| Value::Null).unwrap().receives_from(["A"]).unwrap();
        decl.property("C", |_| Value::Null).unwrap().receives_from(["A", "X"]).unwrap();
        decl.echo("B", ["X", "A"]).unwrap();

        let a: Vec<_> = decl.echoes["A"].iter().cloned().collect();
        let x: Vec<_> = decl.echoes["X"].iter().cloned().collect();
        assert_eq!(a, vec!["B", "C"]);
        assert_eq!(x, vec!["C", "B"]);
    }
}
