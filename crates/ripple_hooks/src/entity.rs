//! Entities and relation references handed to hooks.

use core::fmt;

use indexmap::IndexMap;
use serde_json::Value;

/// Entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eid(pub u64);

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Attribute values keyed by attribute name, in edit order.
pub type Attributes = IndexMap<String, Value>;

/// An entity being mutated.
///
/// During `*_add_entity` and `*_update_entity` events `attrs` holds the
/// pending edited attributes; `before_*` hooks may change them before they
/// reach storage. During deletion it holds the stored attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    eid: Eid,
    etype: String,
    attrs: Attributes,
}

impl Entity {
    /// Creates an entity with no attributes.
    #[must_use]
    pub fn new(eid: Eid, etype: impl Into<String>) -> Self {
        Self {
            eid,
            etype: etype.into(),
            attrs: Attributes::new(),
        }
    }

    /// Replaces the attribute map.
    #[must_use]
    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }

    /// Sets one attribute.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Returns the entity's identifier.
    #[must_use]
    pub fn eid(&self) -> Eid {
        self.eid
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn etype(&self) -> &str {
        &self.etype
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// Sets an attribute, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attrs.insert(name.into(), value.into())
    }

    /// Removes an attribute from the edited set.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.attrs.shift_remove(name)
    }

    /// Returns the attribute map.
    #[must_use]
    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    /// Returns the attribute map mutably.
    pub fn attrs_mut(&mut self) -> &mut Attributes {
        &mut self.attrs
    }
}

/// Which side of a relation an entity sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The entity is the relation's subject (`eidfrom`).
    Subject,
    /// The entity is the relation's object (`eidto`).
    Object,
}

/// A relation `rtype(eidfrom, eidto)` being mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationRef<'a> {
    /// Subject entity.
    pub eidfrom: Eid,
    /// Relation type name.
    pub rtype: &'a str,
    /// Object entity.
    pub eidto: Eid,
}

impl fmt::Display for RelationRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.eidfrom, self.rtype, self.eidto)
    }
}
