//! Entity keys
//!
//! This module defines the identity types used throughout the client:
//! - [`Key`]: application id plus an ordered path of `(kind, id)` elements
//! - [`PathElement`]: one `(kind, id)` step of a key path
//! - [`KeyId`]: a string name or a store-assigned numeric id
//!
//! A key whose last element carries no id is *incomplete*. The store assigns
//! it a numeric id on put. The first element of a key path identifies its
//! entity group, the unit a transaction is scoped to.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a single path element
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// Store-assigned (or caller-chosen) numeric id, never zero
    Id(u64),
    /// Caller-chosen string name, never empty
    Name(String),
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Id(id) => write!(f, "{}", id),
            KeyId::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// One `(kind, id)` step of a key path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement {
    /// Entity kind at this level
    pub kind: String,
    /// Identifier, `None` for the trailing element of an incomplete key
    pub id: Option<KeyId>,
}

impl PathElement {
    /// Create a named path element
    pub fn named(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(KeyId::Name(name.into())),
        }
    }

    /// Create a numeric path element
    pub fn with_id(kind: impl Into<String>, id: u64) -> Self {
        Self {
            kind: kind.into(),
            id: Some(KeyId::Id(id)),
        }
    }

    /// Create a path element without an id
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }
}

/// Key of a stored entity
///
/// Keys are value types: two keys are equal when their application id and
/// every path element are equal. They hash and order consistently, so they
/// can index both hash maps (the session cache) and ordered maps.
///
/// # Examples
///
/// ```
/// use stratus_core::Key;
///
/// let parent = Key::named("app", "Account", "alice");
/// let child = parent.child_named("Order", "o-1");
///
/// assert_eq!(child.kind(), "Order");
/// assert_eq!(child.root(), parent);
/// assert!(child.is_complete());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    app: String,
    path: Vec<PathElement>,
}

impl Key {
    /// Build a key from an explicit path, validating it
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] when the path is empty, a kind is empty,
    /// a name is empty, a numeric id is zero, or an element other than the
    /// last one has no id.
    pub fn from_path(app: impl Into<String>, path: Vec<PathElement>) -> Result<Self> {
        let app = app.into();
        if app.is_empty() {
            return Err(Error::InvalidKey("application id is empty".into()));
        }
        if path.is_empty() {
            return Err(Error::InvalidKey("key path is empty".into()));
        }
        let last = path.len() - 1;
        for (i, element) in path.iter().enumerate() {
            if element.kind.is_empty() {
                return Err(Error::InvalidKey(format!("empty kind at position {}", i)));
            }
            match &element.id {
                Some(KeyId::Name(name)) if name.is_empty() => {
                    return Err(Error::InvalidKey(format!("empty name at position {}", i)));
                }
                Some(KeyId::Id(0)) => {
                    return Err(Error::InvalidKey(format!("zero id at position {}", i)));
                }
                None if i != last => {
                    return Err(Error::InvalidKey(format!(
                        "incomplete element at position {} of {}",
                        i,
                        path.len()
                    )));
                }
                _ => {}
            }
        }
        Ok(Self { app, path })
    }

    /// Root key with a string name
    pub fn named(app: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            path: vec![PathElement::named(kind, name)],
        }
    }

    /// Root key with a numeric id
    pub fn with_id(app: impl Into<String>, kind: impl Into<String>, id: u64) -> Self {
        Self {
            app: app.into(),
            path: vec![PathElement::with_id(kind, id)],
        }
    }

    /// Incomplete root key; the store assigns an id on put
    pub fn incomplete(app: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            path: vec![PathElement::incomplete(kind)],
        }
    }

    /// Child of this key with a string name
    pub fn child_named(&self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        self.child(PathElement::named(kind, name))
    }

    /// Child of this key with a numeric id
    pub fn child_with_id(&self, kind: impl Into<String>, id: u64) -> Self {
        self.child(PathElement::with_id(kind, id))
    }

    fn child(&self, element: PathElement) -> Self {
        let mut path = self.path.clone();
        path.push(element);
        Self {
            app: self.app.clone(),
            path,
        }
    }

    /// Application id this key belongs to
    pub fn app(&self) -> &str {
        &self.app
    }

    /// Full path, root first
    pub fn path(&self) -> &[PathElement] {
        &self.path
    }

    /// Kind of the last path element
    pub fn kind(&self) -> &str {
        self.last().kind.as_str()
    }

    /// Id of the last path element, if any
    pub fn id(&self) -> Option<&KeyId> {
        self.last().id.as_ref()
    }

    /// Whether the last path element carries an id
    pub fn is_complete(&self) -> bool {
        self.last().id.is_some()
    }

    /// Parent key, `None` for root keys
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() < 2 {
            return None;
        }
        Some(Self {
            app: self.app.clone(),
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Root key of this key's entity group
    pub fn root(&self) -> Key {
        Self {
            app: self.app.clone(),
            path: vec![self.path[0].clone()],
        }
    }

    /// Whether `ancestor` is this key or one of its ancestors
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.app == ancestor.app && self.path.starts_with(&ancestor.path)
    }

    /// Copy of this key with the trailing element given a numeric id
    pub fn completed_with(&self, id: u64) -> Key {
        let mut key = self.clone();
        if let Some(last) = key.path.last_mut() {
            last.id = Some(KeyId::Id(id));
        }
        key
    }

    fn last(&self) -> &PathElement {
        // Constructors never produce an empty path.
        &self.path[self.path.len() - 1]
    }
}

impl fmt::Display for Key {
    /// Display as `app:/Kind:id/Kind:id`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.app)?;
        for element in &self.path {
            match &element.id {
                Some(id) => write!(f, "/{}:{}", element.kind, id)?,
                None => write!(f, "/{}:?", element.kind)?,
            }
        }
        Ok(())
    }
}
