//! Tree store: nested JSON mappings addressed by `DocPath`.
//!
//! Purely structural: no transformation awareness. Values are
//! `serde_json::Value`, which already is the tagged
//! null/bool/number/string/sequence/mapping variant the document needs.

use serde_json::{Map, Value};

use super::path::DocPath;
use crate::error::{Error, Result};


/// Alias for stored values; `serde_json::Value` covers every JSON kind.
pub type StoreValue = Value;


/// The whole document, rooted at a mapping.
///
/// `root` is always a `Value::Object`.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeStore {
    root: Value,
}

impl TreeStore {
    /// Create an empty document.
    pub fn new() -> Self {
        TreeStore { root: Value::Object(Map::new()) }
    }

    /// Wrap an existing root mapping.
    pub fn from_map(root: Map<String, Value>) -> Self {
        TreeStore { root: Value::Object(root) }
    }

    /// Borrow the node at `path`. The root path returns the whole document.
    ///
    /// Fails with `PathNotFound` if a token is absent, `NotTraversable`
    /// if a token indexes into a scalar or sequence.
    pub fn get(&self, path: &DocPath) -> Result<&Value> {
        let mut current = &self.root;
        for token in path.tokens() {
            let map = current.as_object().ok_or_else(|| Error::NotTraversable {
                path: path.key(),
                token: token.clone(),
            })?;
            current = map.get(token).ok_or_else(|| Error::PathNotFound {
                path: path.key(),
                token: token.clone(),
            })?;
        }
        Ok(current)
    }

    /// Write `value` at `path`.
    ///
    /// Missing ancestors are created as empty mappings. A non-mapping
    /// ancestor is replaced by an empty mapping. Writing the root requires
    /// a mapping.
    pub fn set(&mut self, path: &DocPath, value: Value) -> Result<()> {
        let tokens = path.tokens();
        let Some((last, ancestors)) = tokens.split_last() else {
            if !value.is_object() {
                return Err(Error::InvalidRootAssignment {
                    found: kind_name(&value),
                });
            }
            self.root = value;
            return Ok(());
        };

        let parent = descend_or_create(self.root_mut(), ancestors);
        parent.insert(last.clone(), value);
        Ok(())
    }

    /// Borrow the root document.
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Replace the whole document.
    pub fn replace(&mut self, root: Map<String, Value>) {
        self.root = Value::Object(root);
    }

    fn root_mut(&mut self) -> &mut Map<String, Value> {
        if !self.root.is_object() {
            self.root = Value::Object(Map::new());
        }
        match &mut self.root {
            Value::Object(map) => map,
            _ => unreachable!("root coerced to an object above"),
        }
    }
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}


/// Walk `tokens` from `map`, creating or coercing each step to a mapping.
pub(crate) fn descend_or_create<'a>(
    mut map: &'a mut Map<String, Value>,
    tokens: &[String],
) -> &'a mut Map<String, Value> {
    for token in tokens {
        let slot = map
            .entry(token.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        map = match slot {
            Value::Object(inner) => inner,
            _ => unreachable!("slot coerced to an object above"),
        };
    }
    map
}


/// Human-readable JSON kind, used in error messages.
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
