//! Document namespace: slash-separated paths and the tree store they address.
//!
//! Provides `DocPath` token sequences (e.g. `sales/north`) and a
//! `TreeStore` backed by nested `serde_json::Value` mappings.

pub mod path;
pub mod tree;

pub use path::DocPath;
pub use tree::{kind_name, StoreValue, TreeStore};
