//! Arguments handed to handlers that accept them.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// What kind of member the changed value is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Property,
    Field,
    Method,
}

/// Description of one change, built once per dispatch and shared by every
/// qualifying handler of that change.
pub struct ChangeArgs<'a, T> {
    sender: &'a T,
    sender_name: &'a str,
    sender_kind: MemberKind,
    old_value: &'a Value,
    new_value: &'a Value,
    target_type: &'static str,
}

impl<'a, T> ChangeArgs<'a, T> {
    pub fn new(
        sender: &'a T,
        sender_name: &'a str,
        sender_kind: MemberKind,
        old_value: &'a Value,
        new_value: &'a Value,
    ) -> Self {
        Self {
            sender,
            sender_name,
            sender_kind,
            old_value,
            new_value,
            target_type: std::any::type_name::<T>(),
        }
    }

    /// The instance whose value changed.
    pub fn sender(&self) -> &'a T {
        self.sender
    }

    pub fn sender_name(&self) -> &'a str {
        self.sender_name
    }

    pub fn sender_kind(&self) -> MemberKind {
        self.sender_kind
    }

    pub fn old_value(&self) -> &'a Value {
        self.old_value
    }

    pub fn new_value(&self) -> &'a Value {
        self.new_value
    }

    /// Type name of the declaring type.
    pub fn target_type(&self) -> &'static str {
        self.target_type
    }

    pub fn are_different(&self) -> bool {
        self.old_value != self.new_value
    }

    /// Decode the old value into a concrete type.
    pub fn old_as<V: DeserializeOwned>(&self) -> Result<V, serde_json::Error> {
        V::deserialize(self.old_value)
    }

    /// Decode the new value into a concrete type.
    pub fn new_as<V: DeserializeOwned>(&self) -> Result<V, serde_json::Error> {
        V::deserialize(self.new_value)
    }
}

impl<T> fmt::Debug for ChangeArgs<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeArgs")
            .field("sender_name", &self.sender_name)
            .field("sender_kind", &self.sender_kind)
            .field("old_value", self.old_value)
            .field("new_value", self.new_value)
            .field("target_type", &self.target_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Sender;

    #[test]
    fn equal_values_are_not_different() {
        let old = json!(42);
        let new = json!(42);
        let args = ChangeArgs::new(&Sender, "A", MemberKind::Property, &old, &new);

        assert!(!args.are_different());
        assert_eq!(args.sender_name(), "A");
        assert!(args.target_type().ends_with("Sender"));
    }

    #[test]
    fn decodes_typed_values() {
        let old = Value::Null;
        let new = json!("ready");
        let args = ChangeArgs::new(&Sender, "status", MemberKind::Field, &old, &new);

        assert!(args.are_different());
        assert_eq!(args.old_as::<Option<String>>().unwrap(), None);
        assert_eq!(args.new_as::<String>().unwrap(), "ready");
        assert!(args.new_as::<i64>().is_err());
    }
}
