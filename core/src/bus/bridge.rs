//! Bus bridge: model writes out to topics, topic messages in to model writes.
//!
//! The bridge never touches the model itself. The hub asks it which mapping
//! prefixes a write should publish, resolves those prefixes under the model
//! lock, and hands the resolved values back here to publish after the lock
//! is released. Inbound messages are routed to mapping prefixes the same way.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::namespace::DocPath;
use super::mapping::BusMapping;
use super::transport::{InboundMessage, Transport};


/// Where a write came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOrigin {
    Http,
    Node(String),
    /// A bus message received through the mapping at `prefix`.
    Bus { prefix: DocPath },
}


pub struct BusBridge {
    transport: Arc<dyn Transport>,
    mappings: Vec<BusMapping>,
    publish_timeout: Duration,
    suppress_echo: bool,
}

impl BusBridge {
    pub fn new(
        transport: Arc<dyn Transport>,
        mappings: Vec<BusMapping>,
        publish_timeout: Duration,
        suppress_echo: bool,
    ) -> Self {
        BusBridge {
            transport,
            mappings,
            publish_timeout,
            suppress_echo,
        }
    }

    pub fn mappings(&self) -> &[BusMapping] {
        &self.mappings
    }

    // -- outbound ------------------------------------------------------------

    /// Prefixes whose resolved value must be published after a write at `path`.
    ///
    /// A mapping qualifies when its prefix is a token-aware prefix of `path`
    /// and it has at least one publishing entry. With echo suppression on, a
    /// bus-originated write skips the mapping it arrived through.
    pub fn prefixes_to_publish(&self, path: &DocPath, origin: &WriteOrigin) -> Vec<DocPath> {
        self.mappings
            .iter()
            .filter(|m| m.covers(path) && m.publish_entries().next().is_some())
            .filter(|m| match origin {
                WriteOrigin::Bus { prefix } if self.suppress_echo && *prefix == m.prefix => {
                    debug!("suppressing echo of {} back to its own topics", m.prefix);
                    false
                }
                _ => true,
            })
            .map(|m| m.prefix.clone())
            .collect()
    }

    /// Publish each resolved prefix to every publishing entry of its mapping.
    ///
    /// All messages are enqueued first and then awaited against one deadline.
    /// Returns the number of acknowledged publishes; any failure turns the
    /// whole call into a `Transport` error listing each failed topic.
    pub fn publish_resolved(&self, resolved: &[(DocPath, Value)]) -> Result<usize> {
        let mut in_flight = Vec::new();
        let mut failures = Vec::new();

        for (prefix, value) in resolved {
            let payload = serde_json::to_vec(value)?;
            for mapping in self.mappings.iter().filter(|m| &m.prefix == prefix) {
                for entry in mapping.publish_entries() {
                    match self
                        .transport
                        .publish(&entry.topic, entry.qos, entry.retain, payload.clone())
                    {
                        Ok(delivery) => {
                            debug!("publishing {} ({} bytes) to {}", prefix, payload.len(), entry.topic);
                            in_flight.push((entry.topic.clone(), delivery));
                        }
                        Err(e) => failures.push(format!("{}: {}", entry.topic, e)),
                    }
                }
            }
        }

        let deadline = Instant::now() + self.publish_timeout;
        let mut delivered = 0;
        for (topic, delivery) in in_flight {
            match delivery.wait_until(deadline) {
                Ok(()) => delivered += 1,
                Err(e) => failures.push(format!("{}: {}", topic, e)),
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(Error::Transport(format!(
                "{} publish(es) failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    // -- inbound -------------------------------------------------------------

    /// Register every subscribing entry with the transport. Failures are
    /// logged and skipped. Returns the number of subscriptions registered.
    pub fn subscribe_all(&self) -> usize {
        let mut count = 0;
        for mapping in &self.mappings {
            for entry in mapping.subscribe_entries() {
                match self.transport.subscribe(&entry.topic, entry.qos) {
                    Ok(()) => {
                        info!("path \"{}\" is subscribed to topic \"{}\"", mapping.prefix, entry.topic);
                        count += 1;
                    }
                    Err(e) => warn!("subscribing {} to {} failed: {}", mapping.prefix, entry.topic, e),
                }
            }
        }
        count
    }

    /// Mapping prefixes with a subscribing entry whose topic filter matches
    /// the message topic.
    pub fn route(&self, message: &InboundMessage) -> Vec<DocPath> {
        self.mappings
            .iter()
            .filter(|m| m.subscribe_entries().any(|e| topic_matches(&e.topic, &message.topic)))
            .map(|m| m.prefix.clone())
            .collect()
    }
}


/// JSON if the payload parses, otherwise the payload as a string.
pub fn decode_payload(payload: &[u8]) -> Value {
    match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(_) => Value::String(String::from_utf8_lossy(payload).into_owned()),
    }
}

/// MQTT topic filter matching with `+` (one level) and `#` (rest).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for f in filter.split('/') {
        match f {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bus::mapping::{MqttConfig, QoS};
    use crate::bus::transport::Delivery;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records publishes and subscriptions; topics in `fail` are rejected.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub published: Mutex<Vec<(String, QoS, bool, Value)>>,
        pub subscribed: Mutex<Vec<String>>,
        pub fail: Vec<String>,
    }

    impl Transport for RecordingTransport {
        fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<Delivery> {
            if self.fail.iter().any(|t| t == topic) {
                return Ok(Delivery::failed("broker refused"));
            }
            let value: Value = serde_json::from_slice(&payload)?;
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), qos, retain, value));
            Ok(Delivery::completed())
        }

        fn subscribe(&self, topic: &str, _qos: QoS) -> Result<()> {
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }
    }

    pub(crate) fn mappings() -> Vec<BusMapping> {
        let cfg: MqttConfig = serde_json::from_value(json!({
            "broker": "tcp://localhost:1883",
            "paths": {
                "sales": [
                    {"topic": "hub/sales", "qos": 1, "retain": true, "publishType": 0}
                ],
                "sensors/temp": [
                    {"topic": "sensors/+/temp", "qos": 0, "publishType": 2}
                ],
                "commands": [
                    {"topic": "cmd/#", "publishType": 1}
                ]
            }
        }))
        .unwrap();
        cfg.mappings()
    }

    fn bridge(transport: Arc<RecordingTransport>, suppress_echo: bool) -> BusBridge {
        BusBridge::new(transport, mappings(), Duration::from_secs(1), suppress_echo)
    }

    fn p(s: &str) -> DocPath {
        DocPath::parse(s)
    }

    #[test]
    fn write_below_prefix_publishes_prefix() {
        let b = bridge(Arc::new(RecordingTransport::default()), false);
        assert_eq!(b.prefixes_to_publish(&p("sales/north"), &WriteOrigin::Http), vec![p("sales")]);
        assert_eq!(b.prefixes_to_publish(&p("sales"), &WriteOrigin::Http), vec![p("sales")]);
    }

    #[test]
    fn prefix_match_is_token_aware() {
        let b = bridge(Arc::new(RecordingTransport::default()), false);
        assert!(b.prefixes_to_publish(&p("salesforce/x"), &WriteOrigin::Http).is_empty());
        // A write above the prefix does not publish it.
        assert!(b.prefixes_to_publish(&p("sensors"), &WriteOrigin::Http).is_empty());
    }

    #[test]
    fn subscribe_only_mappings_never_publish() {
        let b = bridge(Arc::new(RecordingTransport::default()), false);
        assert!(b.prefixes_to_publish(&p("commands/x"), &WriteOrigin::Http).is_empty());
    }

    #[test]
    fn echo_is_published_unless_suppressed() {
        let origin = WriteOrigin::Bus { prefix: p("sensors/temp") };
        let echoing = bridge(Arc::new(RecordingTransport::default()), false);
        assert_eq!(echoing.prefixes_to_publish(&p("sensors/temp"), &origin), vec![p("sensors/temp")]);
        let quiet = bridge(Arc::new(RecordingTransport::default()), true);
        assert!(quiet.prefixes_to_publish(&p("sensors/temp"), &origin).is_empty());
    }

    #[test]
    fn publishes_resolved_value_with_entry_settings() {
        let t = Arc::new(RecordingTransport::default());
        let b = bridge(t.clone(), false);
        let n = b.publish_resolved(&[(p("sales"), json!({"north": 1, "total": 1}))]).unwrap();
        assert_eq!(n, 1);
        let published = t.published.lock().unwrap();
        assert_eq!(
            published[0],
            ("hub/sales".to_string(), QoS::AtLeastOnce, true, json!({"north": 1, "total": 1}))
        );
    }

    #[test]
    fn failures_are_aggregated() {
        let t = Arc::new(RecordingTransport {
            fail: vec!["hub/sales".into()],
            ..Default::default()
        });
        let b = bridge(t.clone(), false);
        let err = b
            .publish_resolved(&[(p("sales"), json!(1)), (p("sensors/temp"), json!(2))])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("1 publish(es) failed"));
        assert!(msg.contains("hub/sales"));
        // The healthy topic still went out.
        assert_eq!(t.published.lock().unwrap().len(), 1);
    }

    #[test]
    fn subscribe_all_registers_subscribing_entries() {
        let t = Arc::new(RecordingTransport::default());
        let b = bridge(t.clone(), false);
        assert_eq!(b.subscribe_all(), 2);
        let subs = t.subscribed.lock().unwrap();
        assert!(subs.contains(&"sensors/+/temp".to_string()));
        assert!(subs.contains(&"cmd/#".to_string()));
    }

    #[test]
    fn route_uses_topic_filters() {
        let b = bridge(Arc::new(RecordingTransport::default()), false);
        let msg = |topic: &str| InboundMessage {
            topic: topic.into(),
            payload: b"1".to_vec(),
        };
        assert_eq!(b.route(&msg("sensors/kitchen/temp")), vec![p("sensors/temp")]);
        assert_eq!(b.route(&msg("cmd/a/b")), vec![p("commands")]);
        assert!(b.route(&msg("hub/sales")).is_empty());
    }

    #[test]
    fn topic_filter_rules() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(topic_matches("a/+/c", "a/x/c"));
        assert!(!topic_matches("a/+", "a"));
        assert!(topic_matches("a/#", "a/x/y"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn payload_decoding() {
        assert_eq!(decode_payload(br#"{"v": 2}"#), json!({"v": 2}));
        assert_eq!(decode_payload(b"21.5"), json!(21.5));
        assert_eq!(decode_payload(b"on"), json!("on"));
    }
}
