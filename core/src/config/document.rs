//! The persisted configuration document: `model`, `transformations`,
//! `nodes` and `mqtt`.
//!
//! Loaded from a file (JSON, or YAML by extension), an HTTP URL, or
//! `config.json` in the working directory. Saved back only to files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bus::MqttConfig;
use crate::error::{Error, Result};
use crate::namespace::DocPath;
use crate::node::NodeRegistry;
use crate::transform::TransformationDef;


pub const DEFAULT_CONFIG_FILE: &str = "config.json";


#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub model: Map<String, Value>,
    #[serde(default)]
    pub transformations: BTreeMap<String, TransformationDef>,
    #[serde(default)]
    pub nodes: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttConfig>,
}

impl ConfigDocument {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read a file, choosing YAML for `.yaml`/`.yml` and JSON otherwise.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        if is_yaml(path) {
            Self::from_yaml(&text)
        } else {
            Self::from_json(&text)
        }
    }

    /// Fetch a JSON document over HTTP.
    pub fn from_url(url: &str) -> Result<Self> {
        let body = ureq::get(url).call()?.into_string()?;
        Self::from_json(&body)
    }

    /// Write the document to `path`, in the format its extension selects.
    ///
    /// Written to a sibling temp file and renamed into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        info!("saved configuration to {}", path.display());
        Ok(())
    }

    /// Transformation definitions keyed by parsed path, validated.
    pub fn transformation_defs(&self) -> Result<BTreeMap<DocPath, TransformationDef>> {
        let mut defs = BTreeMap::new();
        for (key, def) in &self.transformations {
            let path = DocPath::parse(key);
            def.validate(&path)?;
            if defs.insert(path.clone(), def.clone()).is_some() {
                return Err(Error::InvalidTransformationDefinition {
                    path: path.key(),
                    reason: "defined more than once".into(),
                });
            }
        }
        Ok(defs)
    }

    pub fn node_registry(&self) -> NodeRegistry {
        NodeRegistry::from_map(
            self.nodes
                .iter()
                .map(|(alias, paths)| {
                    (alias.clone(), paths.iter().map(|p| DocPath::parse(p)).collect())
                })
                .collect(),
        )
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}


/// Where the configuration document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// An explicitly named file; it must exist.
    File(PathBuf),
    Url(String),
    /// The working-directory default; a missing file means an empty document.
    Default(PathBuf),
}

impl ConfigSource {
    /// Pick the source: explicit file, then URL, then the default file.
    pub fn select(file: Option<PathBuf>, url: Option<String>) -> Self {
        match (file, url) {
            (Some(path), _) => ConfigSource::File(path),
            (None, Some(url)) => ConfigSource::Url(url),
            (None, None) => ConfigSource::Default(PathBuf::from(DEFAULT_CONFIG_FILE)),
        }
    }

    pub fn load(&self) -> Result<ConfigDocument> {
        let doc = match self {
            ConfigSource::File(path) => ConfigDocument::from_path(path)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
            ConfigSource::Url(url) => ConfigDocument::from_url(url)
                .map_err(|e| Error::Config(format!("{}: {}", url, e)))?,
            ConfigSource::Default(path) => {
                if !path.exists() {
                    warn!("{} not found, starting with an empty document", path.display());
                    return Ok(ConfigDocument::default());
                }
                ConfigDocument::from_path(path)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
            }
        };
        info!(
            "loaded configuration from {} ({} transformations, {} nodes)",
            self,
            doc.transformations.len(),
            doc.nodes.len()
        );
        Ok(doc)
    }

    /// File the document is saved back to; URL sources are never written.
    pub fn persist_path(&self) -> Option<&Path> {
        match self {
            ConfigSource::File(p) | ConfigSource::Default(p) => Some(p),
            ConfigSource::Url(_) => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(p) | ConfigSource::Default(p) => write!(f, "{}", p.display()),
            ConfigSource::Url(u) => f.write_str(u),
        }
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "model": {"sales": {"north": 120000, "south": 85000}},
            "transformations": {
                "sales/total": {
                    "implementation": "north + south",
                    "parameters": {"north": "sales/north", "south": "sales/south"}
                },
                "employees/avgSalary": "\"$\" + self + \".00\""
            },
            "nodes": {"allSalesMetrics": ["sales/north", "sales/south"]},
            "mqtt": {
                "broker": "tcp://localhost:1883",
                "paths": {"sales": [{"topic": "hub/sales", "qos": 1, "retain": false, "publishType": 0}]}
            },
            "somethingElse": true
        })
    }

    #[test]
    fn parses_full_document() {
        let doc = ConfigDocument::from_json(&sample().to_string()).unwrap();
        assert_eq!(doc.model["sales"]["north"], json!(120000));
        assert_eq!(doc.transformations.len(), 2);
        assert_eq!(
            doc.transformations["employees/avgSalary"].implementation,
            "\"$\" + self + \".00\""
        );
        assert_eq!(doc.nodes["allSalesMetrics"].len(), 2);
        assert_eq!(doc.mqtt.unwrap().paths["sales"][0].topic, "hub/sales");
    }

    #[test]
    fn empty_document_is_valid() {
        let doc = ConfigDocument::from_json("{}").unwrap();
        assert_eq!(doc, ConfigDocument::default());
    }

    #[test]
    fn transformation_defs_are_keyed_by_path() {
        let doc = ConfigDocument::from_json(&sample().to_string()).unwrap();
        let defs = doc.transformation_defs().unwrap();
        let total = &defs[&DocPath::parse("sales/total")];
        assert_eq!(total.parameters["north"], "sales/north");
    }

    #[test]
    fn duplicate_normalized_keys_are_rejected() {
        let doc = ConfigDocument::from_json(
            &json!({"transformations": {"a/b": "1", "/a/b/": "2"}}).to_string(),
        )
        .unwrap();
        assert!(matches!(
            doc.transformation_defs(),
            Err(Error::InvalidTransformationDefinition { .. })
        ));
    }

    #[test]
    fn node_registry_from_document() {
        let doc = ConfigDocument::from_json(&sample().to_string()).unwrap();
        let nodes = doc.node_registry();
        assert_eq!(nodes.targets("allSalesMetrics").unwrap().len(), 2);
    }

    #[test]
    fn yaml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gator.yaml");
        std::fs::write(
            &path,
            "model:\n  a: 1\ntransformations:\n  b: \"self\"\nnodes:\n  n: [a]\n",
        )
        .unwrap();
        let doc = ConfigDocument::from_path(&path).unwrap();
        assert_eq!(doc.model["a"], json!(1));
        assert_eq!(doc.transformations["b"].implementation, "self");
    }

    #[test]
    fn save_then_load_preserves_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let doc = ConfigDocument::from_json(&sample().to_string()).unwrap();
        doc.save(&path).unwrap();
        assert_eq!(ConfigDocument::from_path(&path).unwrap(), doc);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn missing_default_file_gives_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::Default(dir.path().join("config.json"));
        assert_eq!(source.load().unwrap(), ConfigDocument::default());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigSource::File(dir.path().join("absent.json"));
        assert!(matches!(source.load(), Err(Error::Config(_))));
    }

    #[test]
    fn source_selection_order() {
        assert_eq!(
            ConfigSource::select(Some("a.json".into()), Some("http://x".into())),
            ConfigSource::File("a.json".into())
        );
        assert_eq!(
            ConfigSource::select(None, Some("http://x".into())),
            ConfigSource::Url("http://x".into())
        );
        assert_eq!(
            ConfigSource::select(None, None),
            ConfigSource::Default(DEFAULT_CONFIG_FILE.into())
        );
        assert!(ConfigSource::Url("http://x".into()).persist_path().is_none());
    }
}
