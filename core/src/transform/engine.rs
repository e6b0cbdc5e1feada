//! Lazy, memoized transformation resolution.
//!
//! # Resolve
//!
//! 1. Cache hit returns immediately.
//! 2. A path already in the caller's cycle guard fails with `CircularDependency`.
//! 3. The path joins the guard for the rest of the call and leaves it on every exit.
//! 4. Without a definition the raw stored value is returned.
//! 5. Otherwise `self` and every parameter are bound, the expression is
//!    evaluated, and the result is cached.
//!
//! Invalidation is exact: writing a parameter source does not evict the
//! cached result of a transformation that consumed it. `clear_cache` drops
//! everything except settled results: paths whose stored value is itself
//! the transformed result of a write. Re-evaluating those would bind the
//! already-transformed value as `self` and apply the transformation twice.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, trace};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::namespace::{DocPath, TreeStore};
use crate::script::{Bindings, Evaluator};
use super::definition::TransformationDef;


/// Paths currently being resolved within one top-level operation.
pub type CycleGuard = HashSet<DocPath>;


#[derive(Debug, Default)]
pub struct TransformEngine {
    defs: BTreeMap<DocPath, TransformationDef>,
    cache: HashMap<DocPath, Value>,
    settled: HashSet<DocPath>,
}

impl TransformEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the definition at `path`.
    ///
    /// Replacing a definition evicts its cached result.
    pub fn define(&mut self, path: DocPath, def: TransformationDef) -> Result<()> {
        def.validate(&path)?;
        self.cache.remove(&path);
        self.settled.remove(&path);
        self.defs.insert(path, def);
        Ok(())
    }

    /// Replace every definition at once and clear the cache.
    ///
    /// Validation runs before anything changes; on error the engine is untouched.
    pub fn replace_all(&mut self, defs: BTreeMap<DocPath, TransformationDef>) -> Result<()> {
        for (path, def) in &defs {
            def.validate(path)?;
        }
        self.defs = defs;
        self.cache.clear();
        self.settled.clear();
        Ok(())
    }

    pub fn definition(&self, path: &DocPath) -> Option<&TransformationDef> {
        self.defs.get(path)
    }

    pub fn has_definition(&self, path: &DocPath) -> bool {
        self.defs.contains_key(path)
    }

    pub fn definitions(&self) -> &BTreeMap<DocPath, TransformationDef> {
        &self.defs
    }

    /// Definition paths strictly below `prefix`, token-aware, in path order.
    pub fn descendants<'a>(&'a self, prefix: &'a DocPath) -> impl Iterator<Item = &'a DocPath> + 'a {
        self.defs
            .keys()
            .filter(move |p| p.len() > prefix.len() && p.starts_with(prefix))
    }

    pub fn cached(&self, path: &DocPath) -> Option<&Value> {
        self.cache.get(path)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop the cached result at exactly `path`.
    pub fn invalidate(&mut self, path: &DocPath) {
        if self.cache.remove(path).is_some() {
            trace!("invalidated cached transformation at {}", path);
        }
    }

    /// Mark the cached result at `path` as the value now stored there.
    pub fn settle(&mut self, path: &DocPath) {
        if self.cache.contains_key(path) {
            self.settled.insert(path.clone());
        }
    }

    pub fn is_settled(&self, path: &DocPath) -> bool {
        self.settled.contains(path)
    }

    /// Forget settled paths at, above or below `path`; a write there
    /// replaces the stored transformed value with raw data.
    pub fn release_overlapping(&mut self, path: &DocPath) {
        self.settled
            .retain(|p| !(p.starts_with(path) || path.starts_with(p)));
    }

    /// Drop every cached result except settled ones.
    pub fn clear_cache(&mut self) {
        let settled = &self.settled;
        let before = self.cache.len();
        self.cache.retain(|p, _| settled.contains(p));
        debug!(
            "cleared {} cached transformation results, kept {} settled",
            before - self.cache.len(),
            self.cache.len()
        );
    }

    /// Resolve `path` to its transformed value, or its raw value when no
    /// transformation is defined there.
    pub fn resolve(
        &mut self,
        store: &TreeStore,
        evaluator: &dyn Evaluator,
        path: &DocPath,
        guard: &mut CycleGuard,
    ) -> Result<Value> {
        if let Some(hit) = self.cache.get(path) {
            return Ok(hit.clone());
        }
        if guard.contains(path) {
            return Err(Error::CircularDependency(path.key()));
        }

        guard.insert(path.clone());
        let result = self.resolve_uncached(store, evaluator, path, guard);
        guard.remove(path);
        result
    }

    fn resolve_uncached(
        &mut self,
        store: &TreeStore,
        evaluator: &dyn Evaluator,
        path: &DocPath,
        guard: &mut CycleGuard,
    ) -> Result<Value> {
        let def = match self.defs.get(path) {
            Some(def) => def.clone(),
            None => return store.get(path).cloned(),
        };

        let mut bindings = Bindings::new();
        if let Ok(raw) = store.get(path) {
            bindings.insert("self".to_string(), raw.clone());
        }
        for (name, source) in def.parameter_paths() {
            let value = self.resolve(store, evaluator, &source, guard)?;
            bindings.insert(name.to_string(), value);
        }

        let value = evaluator.evaluate(&def.implementation, &bindings)?;
        debug!("evaluated transformation at {}", path);
        self.cache.insert(path.clone(), value.clone());
        Ok(value)
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
