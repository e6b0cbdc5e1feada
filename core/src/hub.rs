//! Hub: the shared handle every surface works through.
//!
//! Holds the model behind one mutex (all model operations are serialized),
//! the node registry behind a read/write lock, and the optional bus bridge.
//! Outbound publishes are computed under the model lock and sent after it is
//! released, so a slow broker never blocks readers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, info, warn};
use serde_json::Value;

use crate::bus::{decode_payload, BusBridge, InboundMessage, MqttConfig, WriteOrigin};
use crate::config::ConfigDocument;
use crate::error::{Error, Result};
use crate::model::Model;
use crate::namespace::DocPath;
use crate::node::NodeRegistry;
use crate::script::Evaluator;


pub struct Hub {
    model: Mutex<Model>,
    nodes: RwLock<NodeRegistry>,
    bridge: Option<Arc<BusBridge>>,
    mqtt: Mutex<Option<MqttConfig>>,
    persist_path: Option<PathBuf>,
}

impl Hub {
    pub fn new(model: Model, nodes: NodeRegistry) -> Self {
        Hub {
            model: Mutex::new(model),
            nodes: RwLock::new(nodes),
            bridge: None,
            mqtt: Mutex::new(None),
            persist_path: None,
        }
    }

    /// Build model and nodes from a configuration document.
    pub fn from_document(doc: &ConfigDocument, evaluator: Arc<dyn Evaluator>) -> Result<Self> {
        let model = Model::with_contents(evaluator, doc.model.clone(), doc.transformation_defs()?)?;
        let mut hub = Hub::new(model, doc.node_registry());
        hub.mqtt = Mutex::new(doc.mqtt.clone());
        Ok(hub)
    }

    pub fn with_bridge(mut self, bridge: Arc<BusBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// File that `import_config` persists to.
    pub fn with_persist_path(mut self, path: Option<PathBuf>) -> Self {
        self.persist_path = path;
        self
    }

    pub fn bridge(&self) -> Option<&Arc<BusBridge>> {
        self.bridge.as_ref()
    }

    pub fn persist_path(&self) -> Option<&Path> {
        self.persist_path.as_deref()
    }

    fn model(&self) -> Result<MutexGuard<'_, Model>> {
        Ok(self.model.lock()?)
    }

    // -- reads ---------------------------------------------------------------

    pub fn read_resolved(&self, path: &DocPath) -> Result<Value> {
        self.model()?.read_resolved(path)
    }

    pub fn read_raw(&self, path: &DocPath) -> Result<Value> {
        self.model()?.read_raw(path)
    }

    // -- writes --------------------------------------------------------------

    /// Model write followed by the outbound publish for every mapping that
    /// covers `path`. Publish failures are logged; the write stands.
    pub fn write(&self, path: &DocPath, value: Value, origin: WriteOrigin) -> Result<()> {
        let resolved = {
            let mut model = self.model()?;
            model.write(path, value)?;
            match &self.bridge {
                Some(bridge) => {
                    let mut resolved = Vec::new();
                    for prefix in bridge.prefixes_to_publish(path, &origin) {
                        match model.read_resolved(&prefix) {
                            Ok(v) => resolved.push((prefix, v)),
                            Err(e) => warn!("cannot publish {}: {}", prefix, e),
                        }
                    }
                    resolved
                }
                None => Vec::new(),
            }
        };

        if let Some(bridge) = &self.bridge {
            if !resolved.is_empty() {
                match bridge.publish_resolved(&resolved) {
                    Ok(n) => debug!("write at {} published {} message(s)", path, n),
                    Err(e) => warn!("write at {} stored but publishing failed: {}", path, e),
                }
            }
        }
        Ok(())
    }

    /// `UnknownNode` unless `alias` is registered.
    pub fn require_node(&self, alias: &str) -> Result<()> {
        match self.nodes.read()?.targets(alias) {
            Some(_) => Ok(()),
            None => Err(Error::UnknownNode(alias.to_string())),
        }
    }

    /// Fan `value` out to every path of node `alias`. Returns the number of
    /// paths written.
    pub fn write_node(&self, alias: &str, value: &Value) -> Result<usize> {
        let nodes = self.nodes.read()?;
        nodes.fan_out(alias, value, |path, v| {
            self.write(path, v, WriteOrigin::Node(alias.to_string()))
        })
    }

    /// Apply one inbound bus message to every mapping subscribed to its topic.
    /// Returns the number of paths written.
    pub fn apply_inbound(&self, message: &InboundMessage) -> usize {
        let Some(bridge) = &self.bridge else {
            return 0;
        };
        let value = decode_payload(&message.payload);
        let mut written = 0;
        for prefix in bridge.route(message) {
            let origin = WriteOrigin::Bus { prefix: prefix.clone() };
            match self.write(&prefix, value.clone(), origin) {
                Ok(()) => {
                    debug!("message on {} written to {}", message.topic, prefix);
                    written += 1;
                }
                Err(e) => warn!("message on {} not written to {}: {}", message.topic, prefix, e),
            }
        }
        if written == 0 {
            debug!("no subscribed mapping accepted message on {}", message.topic);
        }
        written
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.model()?.clear_cache();
        info!("transformation cache cleared");
        Ok(())
    }

    // -- configuration -------------------------------------------------------

    /// Current raw document, transformations, nodes and bus section.
    pub fn export_config(&self) -> Result<ConfigDocument> {
        let (model, transformations) = {
            let model = self.model()?;
            let document = match model.document() {
                Value::Object(map) => map.clone(),
                _ => serde_json::Map::new(),
            };
            let defs = model
                .transformations()
                .iter()
                .map(|(path, def)| (path.key(), def.clone()))
                .collect();
            (document, defs)
        };
        let nodes = self
            .nodes
            .read()?
            .aliases()
            .iter()
            .map(|(alias, paths)| (alias.clone(), paths.iter().map(DocPath::key).collect()))
            .collect();
        let mqtt = self.mqtt.lock()?.clone();
        Ok(ConfigDocument {
            model,
            transformations,
            nodes,
            mqtt,
        })
    }

    /// Replace model contents, transformations and nodes, clear the cache,
    /// and persist the document when a config file is known.
    ///
    /// Bus mappings stay as they were until restart.
    pub fn import_config(&self, doc: ConfigDocument) -> Result<()> {
        let defs = doc.transformation_defs()?;
        self.model()?.replace_contents(doc.model.clone(), defs)?;
        *self.nodes.write()? = doc.node_registry();

        {
            let mut mqtt = self.mqtt.lock()?;
            if *mqtt != doc.mqtt {
                info!("mqtt section changed; it takes effect after restart");
            }
            *mqtt = doc.mqtt.clone();
        }

        match &self.persist_path {
            Some(path) => doc.save(path)?,
            None => debug!("no config file to persist to"),
        }
        info!(
            "configuration imported ({} transformations, {} nodes)",
            doc.transformations.len(),
            doc.nodes.len()
        );
        Ok(())
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::bridge::tests::RecordingTransport;
    use crate::bus::QoS;
    use crate::error::Error;
    use crate::script::ExprEvaluator;
    use serde_json::json;
    use std::time::Duration;

    fn document() -> ConfigDocument {
        serde_json::from_value(json!({
            "model": {
                "sales": {"north": 120000, "south": 85000, "east": 95000, "west": 110000},
                "employees": {"avgSalary": 65000}
            },
            "transformations": {
                "sales/total": {
                    "implementation": "north + south + east + west",
                    "parameters": {
                        "north": "sales/north", "south": "sales/south",
                        "east": "sales/east", "west": "sales/west"
                    }
                },
                "employees/avgSalary": {"implementation": "\"$\" + self + \".00\"", "parameters": {}}
            },
            "nodes": {
                "allSalesMetrics": ["sales/north", "sales/south", "sales/east", "sales/west"]
            },
            "mqtt": {
                "broker": "tcp://localhost:1883",
                "paths": {
                    "sales": [{"topic": "hub/sales", "qos": 1, "retain": false, "publishType": 0}],
                    "sensors/temp": [{"topic": "sensors/temp", "qos": 0, "retain": false, "publishType": 2}]
                }
            }
        }))
        .unwrap()
    }

    fn hub_with_bus(suppress_echo: bool) -> (Hub, Arc<RecordingTransport>) {
        let doc = document();
        let transport = Arc::new(RecordingTransport::default());
        let mappings = doc.mqtt.as_ref().map(|m| m.mappings()).unwrap_or_default();
        let bridge = BusBridge::new(transport.clone(), mappings, Duration::from_secs(1), suppress_echo);
        let hub = Hub::from_document(&doc, Arc::new(ExprEvaluator::default()))
            .unwrap()
            .with_bridge(Arc::new(bridge));
        (hub, transport)
    }

    fn p(s: &str) -> DocPath {
        DocPath::parse(s)
    }

    #[test]
    fn resolves_configured_transformations() {
        let hub = Hub::from_document(&document(), Arc::new(ExprEvaluator::default())).unwrap();
        assert_eq!(hub.read_resolved(&p("sales/total")).unwrap(), json!(410000));
        assert_eq!(hub.read_resolved(&p("employees/avgSalary")).unwrap(), json!("$65000.00"));
    }

    #[test]
    fn write_publishes_resolved_mapping_once() {
        let (hub, transport) = hub_with_bus(false);
        hub.write(&p("sales/north"), json!(20000), WriteOrigin::Http).unwrap();

        let published = transport.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let (topic, qos, _, payload) = &published[0];
        assert_eq!(topic, "hub/sales");
        assert_eq!(*qos, QoS::AtLeastOnce);
        assert_eq!(payload["north"], json!(20000));
        assert_eq!(payload["total"], json!(310000));
    }

    #[test]
    fn unmapped_write_publishes_nothing() {
        let (hub, transport) = hub_with_bus(false);
        hub.write(&p("employees/count"), json!(3), WriteOrigin::Http).unwrap();
        assert!(transport.published.lock().unwrap().is_empty());
    }

    #[test]
    fn node_write_fans_out_and_publishes_each_target() {
        let (hub, transport) = hub_with_bus(false);
        assert_eq!(hub.write_node("allSalesMetrics", &json!(10)).unwrap(), 4);
        assert_eq!(hub.read_raw(&p("sales/west")).unwrap(), json!(10));
        assert_eq!(transport.published.lock().unwrap().len(), 4);
    }

    #[test]
    fn unknown_node_is_reported() {
        let (hub, _) = hub_with_bus(false);
        assert!(matches!(hub.write_node("ghost", &json!(1)), Err(Error::UnknownNode(_))));
        assert!(hub.require_node("allSalesMetrics").is_ok());
        assert!(matches!(hub.require_node("ghost"), Err(Error::UnknownNode(_))));
    }

    #[test]
    fn inbound_message_writes_mapping_prefix() {
        let (hub, transport) = hub_with_bus(false);
        let msg = InboundMessage {
            topic: "sensors/temp".into(),
            payload: b"21.5".to_vec(),
        };
        assert_eq!(hub.apply_inbound(&msg), 1);
        assert_eq!(hub.read_raw(&p("sensors/temp")).unwrap(), json!(21.5));
        // Both-direction mapping echoes the value back out.
        assert_eq!(transport.published.lock().unwrap().len(), 1);
    }

    #[test]
    fn inbound_echo_can_be_suppressed() {
        let (hub, transport) = hub_with_bus(true);
        let msg = InboundMessage {
            topic: "sensors/temp".into(),
            payload: b"not json".to_vec(),
        };
        assert_eq!(hub.apply_inbound(&msg), 1);
        assert_eq!(hub.read_raw(&p("sensors/temp")).unwrap(), json!("not json"));
        assert!(transport.published.lock().unwrap().is_empty());
    }

    #[test]
    fn publish_failure_does_not_undo_write() {
        let doc = document();
        let transport = Arc::new(RecordingTransport {
            fail: vec!["hub/sales".into()],
            ..Default::default()
        });
        let bridge = BusBridge::new(
            transport,
            doc.mqtt.as_ref().map(|m| m.mappings()).unwrap_or_default(),
            Duration::from_millis(50),
            false,
        );
        let hub = Hub::from_document(&doc, Arc::new(ExprEvaluator::default()))
            .unwrap()
            .with_bridge(Arc::new(bridge));
        hub.write(&p("sales/north"), json!(1), WriteOrigin::Http).unwrap();
        assert_eq!(hub.read_raw(&p("sales/north")).unwrap(), json!(1));
    }

    #[test]
    fn clear_cache_refreshes_dependents() {
        let hub = Hub::from_document(&document(), Arc::new(ExprEvaluator::default())).unwrap();
        assert_eq!(hub.read_resolved(&p("sales/total")).unwrap(), json!(410000));
        hub.write_node("allSalesMetrics", &json!(10)).unwrap();
        assert_eq!(hub.read_resolved(&p("sales/total")).unwrap(), json!(410000));
        hub.clear_cache().unwrap();
        assert_eq!(hub.read_resolved(&p("sales/total")).unwrap(), json!(40));
    }

    #[test]
    fn export_reflects_writes() {
        let hub = Hub::from_document(&document(), Arc::new(ExprEvaluator::default())).unwrap();
        hub.write(&p("sales/north"), json!(1), WriteOrigin::Http).unwrap();
        let doc = hub.export_config().unwrap();
        assert_eq!(doc.model["sales"]["north"], json!(1));
        assert_eq!(doc.transformations.len(), 2);
        assert_eq!(doc.nodes["allSalesMetrics"][0], "sales/north");
        assert!(doc.mqtt.is_some());
    }

    #[test]
    fn import_replaces_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let hub = Hub::from_document(&document(), Arc::new(ExprEvaluator::default()))
            .unwrap()
            .with_persist_path(Some(path.clone()));
        hub.read_resolved(&p("sales/total")).unwrap();

        let replacement: ConfigDocument = serde_json::from_value(json!({
            "model": {"x": 2},
            "transformations": {"double": {"implementation": "x * 2", "parameters": {"x": "x"}}},
            "nodes": {"only": ["x"]}
        }))
        .unwrap();
        hub.import_config(replacement.clone()).unwrap();

        assert_eq!(hub.read_resolved(&p("double")).unwrap(), json!(4));
        assert!(hub.read_resolved(&p("sales/total")).is_err());
        assert_eq!(hub.write_node("only", &json!(5)).unwrap(), 1);
        assert_eq!(ConfigDocument::from_path(&path).unwrap(), replacement);
    }

    #[test]
    fn invalid_import_changes_nothing() {
        let hub = Hub::from_document(&document(), Arc::new(ExprEvaluator::default())).unwrap();
        let bad: ConfigDocument = serde_json::from_value(json!({
            "model": {},
            "transformations": {"x": {"implementation": "", "parameters": {}}}
        }))
        .unwrap();
        assert!(hub.import_config(bad).is_err());
        assert_eq!(hub.read_resolved(&p("sales/total")).unwrap(), json!(410000));
    }
}
