//! Bus mapping types: path prefix → topic entries, and the MQTT client section.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::namespace::DocPath;


/// MQTT quality of service, serialized as `0`, `1` or `2`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("qos must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(q: QoS) -> u8 {
        match q {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}


/// Direction of a mapping entry, serialized as `0` (publish), `1`
/// (subscribe) or `2` (both).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PublishType {
    #[default]
    Publish,
    Subscribe,
    Both,
}

impl PublishType {
    pub fn publishes(self) -> bool {
        matches!(self, PublishType::Publish | PublishType::Both)
    }

    pub fn subscribes(self) -> bool {
        matches!(self, PublishType::Subscribe | PublishType::Both)
    }
}

impl TryFrom<u8> for PublishType {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PublishType::Publish),
            1 => Ok(PublishType::Subscribe),
            2 => Ok(PublishType::Both),
            other => Err(format!("publishType must be 0, 1 or 2, got {}", other)),
        }
    }
}

impl From<PublishType> for u8 {
    fn from(p: PublishType) -> u8 {
        match p {
            PublishType::Publish => 0,
            PublishType::Subscribe => 1,
            PublishType::Both => 2,
        }
    }
}


/// One topic bound to a path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttPath {
    pub topic: String,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub publish_type: PublishType,
}


/// The `mqtt` section of the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConfig {
    pub broker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_server_hostname: Option<String>,
    /// Path prefix → topic entries.
    #[serde(default)]
    pub paths: BTreeMap<String, Vec<MqttPath>>,
}

impl MqttConfig {
    /// Parsed mapping table for the bridge.
    pub fn mappings(&self) -> Vec<BusMapping> {
        self.paths
            .iter()
            .map(|(prefix, entries)| BusMapping {
                prefix: DocPath::parse(prefix),
                entries: entries.clone(),
            })
            .collect()
    }
}


/// A path prefix with its ordered topic entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMapping {
    pub prefix: DocPath,
    pub entries: Vec<MqttPath>,
}

impl BusMapping {
    pub fn publish_entries(&self) -> impl Iterator<Item = &MqttPath> {
        self.entries.iter().filter(|e| e.publish_type.publishes())
    }

    pub fn subscribe_entries(&self) -> impl Iterator<Item = &MqttPath> {
        self.entries.iter().filter(|e| e.publish_type.subscribes())
    }

    /// Token-aware: `sales` covers `sales/north` but not `salesforce/x`.
    pub fn covers(&self, path: &DocPath) -> bool {
        path.starts_with(&self.prefix)
    }
}

impl fmt::Display for BusMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} topics)", self.prefix, self.entries.len())
    }
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_mqtt_section() {
        let cfg: MqttConfig = serde_json::from_value(json!({
            "broker": "tcp://localhost:1883",
            "username": "gator",
            "secure": false,
            "paths": {
                "sales": [
                    {"topic": "hub/sales", "qos": 1, "retain": true, "publishType": 0},
                    {"topic": "hub/sales/in", "qos": 0, "retain": false, "publishType": 1}
                ]
            }
        }))
        .unwrap();
        assert_eq!(cfg.username.as_deref(), Some("gator"));
        let entries = &cfg.paths["sales"];
        assert_eq!(entries[0].qos, QoS::AtLeastOnce);
        assert!(entries[0].retain);
        assert_eq!(entries[1].publish_type, PublishType::Subscribe);
    }

    #[test]
    fn rejects_out_of_range_enums() {
        assert!(serde_json::from_value::<MqttPath>(json!({"topic": "t", "qos": 3})).is_err());
        assert!(serde_json::from_value::<MqttPath>(json!({"topic": "t", "publishType": 7})).is_err());
    }

    #[test]
    fn serializes_enums_as_integers() {
        let entry = MqttPath {
            topic: "t".into(),
            qos: QoS::ExactlyOnce,
            retain: false,
            publish_type: PublishType::Both,
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["qos"], json!(2));
        assert_eq!(v["publishType"], json!(2));
    }

    #[test]
    fn direction_predicates() {
        assert!(PublishType::Publish.publishes() && !PublishType::Publish.subscribes());
        assert!(!PublishType::Subscribe.publishes() && PublishType::Subscribe.subscribes());
        assert!(PublishType::Both.publishes() && PublishType::Both.subscribes());
    }

    #[test]
    fn covers_is_token_aware() {
        let m = BusMapping {
            prefix: DocPath::parse("sale"),
            entries: Vec::new(),
        };
        assert!(m.covers(&DocPath::parse("sale/x")));
        assert!(m.covers(&DocPath::parse("sale")));
        assert!(!m.covers(&DocPath::parse("sales/north")));
    }

    #[test]
    fn mappings_split_directions() {
        let cfg: MqttConfig = serde_json::from_value(json!({
            "broker": "tcp://b:1883",
            "paths": {"a/b": [
                {"topic": "p", "publishType": 0},
                {"topic": "s", "publishType": 1},
                {"topic": "both", "publishType": 2}
            ]}
        }))
        .unwrap();
        let m = &cfg.mappings()[0];
        assert_eq!(m.prefix, DocPath::parse("a/b"));
        let pubs: Vec<_> = m.publish_entries().map(|e| e.topic.as_str()).collect();
        let subs: Vec<_> = m.subscribe_entries().map(|e| e.topic.as_str()).collect();
        assert_eq!(pubs, vec!["p", "both"]);
        assert_eq!(subs, vec!["s", "both"]);
    }
}
