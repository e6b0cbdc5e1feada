//! Model: the document plus its transformations.
//!
//! Owns the tree store, the transformation engine and the evaluator. Every
//! operation takes `&mut self` or `&self`; callers that share a model across
//! threads wrap it in a mutex (see `hub`), which gives the fully serialized
//! access the cycle guard and cache assume.
//!
//! # Write
//!
//! `received → cache-invalidated → stored-raw → transform-attempted →
//! {stored-transformed | stored-raw-unchanged}`
//!
//! A failed write-triggered transformation is logged and the raw value
//! stands. The same failure during a read propagates.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::namespace::tree::descend_or_create;
use crate::namespace::{DocPath, TreeStore};
use crate::script::Evaluator;
use crate::transform::{CycleGuard, TransformEngine, TransformationDef};


pub struct Model {
    store: TreeStore,
    engine: TransformEngine,
    evaluator: Arc<dyn Evaluator>,
}

impl Model {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Model {
            store: TreeStore::new(),
            engine: TransformEngine::new(),
            evaluator,
        }
    }

    /// Build a model from an initial document and transformation set.
    pub fn with_contents(
        evaluator: Arc<dyn Evaluator>,
        document: Map<String, Value>,
        transformations: BTreeMap<DocPath, TransformationDef>,
    ) -> Result<Self> {
        let mut model = Model::new(evaluator);
        model.replace_contents(document, transformations)?;
        Ok(model)
    }

    // -- reads ---------------------------------------------------------------

    /// Raw stored value at `path`, no transformation applied.
    pub fn read_raw(&self, path: &DocPath) -> Result<Value> {
        self.store.get(path).cloned()
    }

    /// Value at `path` with transformations applied.
    ///
    /// A raw mapping is copied and every transformation defined below it is
    /// overlaid at its relative position, creating keys the raw tree lacks.
    /// A raw scalar or sequence resolves directly. With no raw data the
    /// read still succeeds if transformations exist at or below `path`.
    pub fn read_resolved(&mut self, path: &DocPath) -> Result<Value> {
        let mut guard = CycleGuard::new();

        if self.engine.has_definition(path) {
            return self.resolve_with(path, &mut guard);
        }

        let base = match self.store.get(path) {
            Ok(Value::Object(map)) => map.clone(),
            Ok(_) => return self.resolve_with(path, &mut guard),
            Err(e) => {
                if self.engine.descendants(path).next().is_none() {
                    return Err(e);
                }
                Map::new()
            }
        };

        let overlays: Vec<DocPath> = self.engine.descendants(path).cloned().collect();
        let mut result = base;
        for def_path in overlays {
            let value = self.resolve_with(&def_path, &mut guard)?;
            let Some(relative) = def_path.strip_prefix(path) else {
                continue;
            };
            let Some((leaf, ancestors)) = relative.tokens().split_last() else {
                continue;
            };
            descend_or_create(&mut result, ancestors).insert(leaf.clone(), value);
        }
        Ok(Value::Object(result))
    }

    /// Resolve `path` alone: the transformation result if one is defined,
    /// the raw value otherwise.
    pub fn resolve(&mut self, path: &DocPath) -> Result<Value> {
        self.resolve_with(path, &mut CycleGuard::new())
    }

    fn resolve_with(&mut self, path: &DocPath, guard: &mut CycleGuard) -> Result<Value> {
        self.engine
            .resolve(&self.store, self.evaluator.as_ref(), path, guard)
    }

    // -- writes --------------------------------------------------------------

    /// Store `value` at `path`, replacing it with the transformed result when
    /// a transformation is defined at exactly that path.
    pub fn write(&mut self, path: &DocPath, value: Value) -> Result<()> {
        self.engine.invalidate(path);
        self.engine.release_overlapping(path);
        self.store.set(path, value)?;

        if !self.engine.has_definition(path) {
            debug!("stored raw value at {}", path);
            return Ok(());
        }

        match self.resolve(path) {
            Ok(transformed) => {
                debug!("stored transformed value at {}", path);
                self.store.set(path, transformed)?;
                self.engine.settle(path);
            }
            Err(e) => {
                warn!("transformation at {} failed, keeping raw value: {}", path, e);
            }
        }
        Ok(())
    }

    // -- transformations -----------------------------------------------------

    pub fn define_transformation(&mut self, path: DocPath, def: TransformationDef) -> Result<()> {
        self.engine.define(path, def)
    }

    pub fn transformations(&self) -> &BTreeMap<DocPath, TransformationDef> {
        self.engine.definitions()
    }

    /// Drop every cached transformation result.
    pub fn clear_cache(&mut self) {
        self.engine.clear_cache();
    }

    pub fn cached(&self, path: &DocPath) -> Option<&Value> {
        self.engine.cached(path)
    }

    // -- whole-document access -----------------------------------------------

    pub fn document(&self) -> &Value {
        self.store.root()
    }

    /// Replace document and transformations together; the cache is cleared.
    ///
    /// Definitions are validated before anything is replaced.
    pub fn replace_contents(
        &mut self,
        document: Map<String, Value>,
        transformations: BTreeMap<DocPath, TransformationDef>,
    ) -> Result<()> {
        self.engine.replace_all(transformations)?;
        self.store.replace(document);
        Ok(())
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("store", &self.store)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
