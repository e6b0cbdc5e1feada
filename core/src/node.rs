//! Node aliases: one name, many document paths.

use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::namespace::DocPath;


/// Alias → ordered target paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeRegistry {
    aliases: BTreeMap<String, Vec<DocPath>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(aliases: BTreeMap<String, Vec<DocPath>>) -> Self {
        NodeRegistry { aliases }
    }

    pub fn insert(&mut self, alias: impl Into<String>, targets: Vec<DocPath>) {
        self.aliases.insert(alias.into(), targets);
    }

    pub fn targets(&self, alias: &str) -> Option<&[DocPath]> {
        self.aliases.get(alias).map(Vec::as_slice)
    }

    pub fn aliases(&self) -> &BTreeMap<String, Vec<DocPath>> {
        &self.aliases
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Write `value` to every target of `alias`, in order, through `write`.
    ///
    /// Stops at the first failing target and returns its error. Targets
    /// already written stay written. Returns the number of targets written.
    pub fn fan_out<F>(&self, alias: &str, value: &Value, mut write: F) -> Result<usize>
    where
        F: FnMut(&DocPath, Value) -> Result<()>,
    {
        let targets = self
            .aliases
            .get(alias)
            .ok_or_else(|| Error::UnknownNode(alias.to_string()))?;
        for target in targets {
            write(target, value.clone())?;
        }
        debug!("node '{}' fanned out to {} paths", alias, targets.len());
        Ok(targets.len())
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
