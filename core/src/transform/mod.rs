//! Transformation definitions and the engine that resolves them.

pub mod definition;
pub mod engine;

pub use definition::TransformationDef;
pub use engine::{CycleGuard, TransformEngine};
