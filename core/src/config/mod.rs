//! Configuration: the persisted document and the process settings.

pub mod document;
pub mod settings;

pub use document::{ConfigDocument, ConfigSource};
pub use settings::Settings;
