//! Gator: a data-aggregation hub.
//!
//! A path-indexed JSON document whose reads are overlaid with lazily
//! evaluated, memoized transformations, reachable over HTTP and bridged to
//! an MQTT broker.
//!
//! # Modules
//!
//! - [`namespace`]: `DocPath` and the tree store
//! - [`script`]: the `Evaluator` contract and the built-in expression dialect
//! - [`transform`]: transformation definitions and the resolving engine
//! - [`model`]: raw and resolved reads, writes with write-triggered transforms
//! - [`node`]: aliases that fan one write out to many paths
//! - [`bus`]: topic mappings, the MQTT transport and the bridge
//! - [`config`]: the persisted document and process settings
//! - [`hub`]: the shared handle every surface writes through
//! - [`daemon`]: the inbound event loop
//! - [`service`]: HTTP routes
//! - [`client`]: HTTP client for a running hub

pub mod bus;
pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hub;
pub mod model;
pub mod namespace;
pub mod node;
pub mod script;
pub mod service;
pub mod transform;

pub use error::{Error, Result};
pub use hub::Hub;
pub use model::Model;
pub use namespace::DocPath;
