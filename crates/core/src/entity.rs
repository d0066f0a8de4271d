//! Entities
//!
//! An [`Entity`] is a kind, an optional [`Key`] and an ordered property map.
//! Entities built in application code usually start without a key (or with an
//! incomplete one); the key is filled in when a put is acknowledged.

use crate::error::{Error, Result};
use crate::key::Key;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property names an entity may not carry
pub const RESERVED_PROPERTIES: &[&str] = &["key"];

/// A stored record
///
/// Equality compares kind, key and every property, which is what the session
/// cache uses to detect that a query returned a different version than the
/// one the session already holds.
///
/// # Examples
///
/// ```
/// use stratus_core::{Entity, Key, Value};
///
/// let mut user = Entity::new("User");
/// user.set("name", "Alice");
/// user.set_key(Key::named("app", "User", "alice"));
///
/// assert_eq!(user.get("name"), Some(&Value::from("Alice")));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    kind: String,
    key: Option<Key>,
    properties: BTreeMap<String, Value>,
}

impl Entity {
    /// Create an empty entity of the given kind, without a key
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: None,
            properties: BTreeMap::new(),
        }
    }

    /// Create an empty entity addressed by `key`; the kind is taken from the key
    pub fn with_key(key: Key) -> Self {
        Self {
            kind: key.kind().to_string(),
            key: Some(key),
            properties: BTreeMap::new(),
        }
    }

    /// Create an entity from a list of fields
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEntity`] if a field uses a reserved name.
    pub fn from_fields<I, S>(kind: impl Into<String>, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        let mut entity = Self::new(kind);
        for (name, value) in fields {
            let name = name.into();
            if RESERVED_PROPERTIES.contains(&name.as_str()) {
                return Err(Error::InvalidEntity(format!(
                    "property name '{}' is reserved",
                    name
                )));
            }
            entity.properties.insert(name, value);
        }
        Ok(entity)
    }

    /// Kind of this entity
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Key, if assigned
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Replace the key
    pub fn set_key(&mut self, key: Key) {
        self.key = Some(key);
    }

    /// Get a property
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Set a property, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(name.into(), value.into())
    }

    /// Remove a property
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    /// All properties in name order
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }
}
