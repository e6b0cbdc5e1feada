//! MQTT transport on `rumqttc`.
//!
//! A background thread drives the `rumqttc` connection: it forwards inbound
//! publishes to the daemon channel, matches broker acknowledgements to the
//! deliveries handed out by [`MqttTransport::publish`], and re-issues every
//! registered subscription after each `ConnAck`. Reconnection is the
//! connection iterator's own retry, paced by the reconnect interval.
//!
//! # Ack matching
//!
//! `rumqttc` reports `Outgoing::Publish(pkid)` in request order. Each publish
//! pushes a pending entry under the same lock that enqueues the request, so
//! the n-th outgoing event belongs to the n-th pending entry. QoS 0 completes
//! on send; QoS 1 and 2 complete on `PubAck` / `PubComp`. An outgoing event
//! for a pkid already in flight is a retransmit and consumes nothing. A
//! `ConnAck` without a stored session fails everything still in flight, so
//! reused pkids start from an empty table.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, TlsConfiguration};
use url::Url;

use crate::error::{Error, Result};
use super::mapping::{MqttConfig, QoS};
use super::transport::{Delivery, InboundMessage, Transport};


pub const KEEP_ALIVE: Duration = Duration::from_secs(60);
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;
/// How long `connect` waits for the first connection outcome.
const FIRST_CONNECT_WAIT: Duration = Duration::from_secs(10);

type AckSender = mpsc::Sender<std::result::Result<(), String>>;


/// Connection state as seen by publishers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    /// Connection lost or never established; the event loop keeps retrying.
    Unavailable(String),
}


// ---------------------------------------------------------------------------
// Ack tracking
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AckTracker {
    pending: VecDeque<(QoS, AckSender)>,
    inflight: HashMap<u16, AckSender>,
}

impl AckTracker {
    fn push(&mut self, qos: QoS) -> mpsc::Receiver<std::result::Result<(), String>> {
        let (tx, rx) = mpsc::channel();
        self.pending.push_back((qos, tx));
        rx
    }

    /// Undo the last `push` when the request could not be enqueued.
    fn pop_last(&mut self) {
        self.pending.pop_back();
    }

    fn on_outgoing(&mut self, pkid: u16) {
        if pkid != 0 && self.inflight.contains_key(&pkid) {
            return;
        }
        let Some((qos, tx)) = self.pending.pop_front() else {
            return;
        };
        if qos == QoS::AtMostOnce {
            let _ = tx.send(Ok(()));
        } else {
            self.inflight.insert(pkid, tx);
        }
    }

    fn on_ack(&mut self, pkid: u16) {
        if let Some(tx) = self.inflight.remove(&pkid) {
            let _ = tx.send(Ok(()));
        }
    }

    /// Fail every in-flight delivery; the broker will never ack them.
    fn reset_inflight(&mut self, reason: &str) -> usize {
        let failed = self.inflight.len();
        for (_, tx) in self.inflight.drain() {
            let _ = tx.send(Err(reason.to_string()));
        }
        failed
    }
}


// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct Shared {
    state: Mutex<LinkState>,
    acks: Mutex<AckTracker>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
}

pub struct MqttTransport {
    client: Client,
    shared: Arc<Shared>,
}

impl MqttTransport {
    /// Connect to the configured broker and start the event-loop thread.
    ///
    /// Inbound publishes are converted and forwarded on `inbound`. A failed
    /// first attempt is logged and leaves the transport `Unavailable` while
    /// the event loop keeps retrying; only configuration errors fail here.
    pub fn connect<E>(config: &MqttConfig, inbound: mpsc::Sender<E>) -> Result<Self>
    where
        E: From<InboundMessage> + Send + 'static,
    {
        let options = build_options(config)?;
        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let shared = Arc::new(Shared {
            state: Mutex::new(LinkState::Connecting),
            acks: Mutex::new(AckTracker::default()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let (first_tx, first_rx) = mpsc::channel();
        let loop_shared = Arc::clone(&shared);
        let loop_client = client.clone();
        thread::Builder::new()
            .name("gator-mqtt".into())
            .spawn(move || run_event_loop(connection, loop_client, loop_shared, inbound, first_tx))?;

        match first_rx.recv_timeout(FIRST_CONNECT_WAIT) {
            Ok(Ok(())) => info!("connected to MQTT broker {}", config.broker),
            Ok(Err(reason)) => error!("MQTT broker {} unavailable: {}", config.broker, reason),
            Err(_) => warn!("MQTT broker {} did not answer within {:?}", config.broker, FIRST_CONNECT_WAIT),
        }

        Ok(MqttTransport { client, shared })
    }

    pub fn state(&self) -> LinkState {
        match self.shared.state.lock() {
            Ok(s) => s.clone(),
            Err(_) => LinkState::Unavailable("state lock poisoned".into()),
        }
    }

    pub fn disconnect(&self) {
        if let Err(e) = self.client.disconnect() {
            debug!("MQTT disconnect: {}", e);
        }
    }
}

impl Transport for MqttTransport {
    fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Vec<u8>) -> Result<Delivery> {
        match self.state() {
            LinkState::Connected => {}
            LinkState::Connecting => return Err(Error::Transport("broker connection pending".into())),
            LinkState::Unavailable(reason) => return Err(Error::Transport(reason)),
        }

        let mut acks = self.shared.acks.lock()?;
        let rx = acks.push(qos);
        if let Err(e) = self.client.try_publish(topic, to_wire(qos), retain, payload) {
            acks.pop_last();
            return Err(Error::Transport(format!("publish to {} not queued: {}", topic, e)));
        }
        Ok(Delivery::pending(rx))
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        let mut subs = self.shared.subscriptions.lock()?;
        if !subs.iter().any(|(t, _)| t == topic) {
            subs.push((topic.to_string(), qos));
        }
        if self.state() == LinkState::Connected {
            self.client
                .try_subscribe(topic, to_wire(qos))
                .map_err(|e| Error::Transport(format!("subscribe to {}: {}", topic, e)))?;
        }
        Ok(())
    }
}


fn run_event_loop<E: From<InboundMessage>>(
    mut connection: Connection,
    client: Client,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<E>,
    first: mpsc::Sender<std::result::Result<(), String>>,
) {
    let mut first = Some(first);

    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if !ack.session_present {
                    with_acks(&shared, |a| {
                        let failed = a.reset_inflight("session lost before acknowledgement");
                        if failed > 0 {
                            warn!("{} unacknowledged publish(es) dropped by a clean session", failed);
                        }
                    });
                }
                set_state(&shared, LinkState::Connected);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Ok(()));
                }
                resubscribe(&client, &shared);
            }
            Ok(Event::Incoming(Packet::Publish(p))) => {
                debug!("MQTT message on {} ({} bytes)", p.topic, p.payload.len());
                let msg = InboundMessage {
                    topic: p.topic.clone(),
                    payload: p.payload.to_vec(),
                };
                if inbound.send(E::from(msg)).is_err() {
                    info!("inbound channel closed, stopping MQTT event loop");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => with_acks(&shared, |a| a.on_ack(ack.pkid)),
            Ok(Event::Incoming(Packet::PubComp(comp))) => with_acks(&shared, |a| a.on_ack(comp.pkid)),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => with_acks(&shared, |a| a.on_outgoing(pkid)),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("MQTT client disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let reason = e.to_string();
                warn!("MQTT connection lost: {}", reason);
                set_state(&shared, LinkState::Unavailable(reason.clone()));
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(reason));
                }
                thread::sleep(RECONNECT_INTERVAL);
            }
        }
    }
    set_state(&shared, LinkState::Unavailable("event loop stopped".into()));
}

fn set_state(shared: &Shared, state: LinkState) {
    if let Ok(mut s) = shared.state.lock() {
        *s = state;
    }
}

fn with_acks(shared: &Shared, f: impl FnOnce(&mut AckTracker)) {
    if let Ok(mut acks) = shared.acks.lock() {
        f(&mut acks);
    }
}

fn resubscribe(client: &Client, shared: &Shared) {
    let subs = match shared.subscriptions.lock() {
        Ok(s) => s.clone(),
        Err(_) => return,
    };
    for (topic, qos) in subs {
        match client.try_subscribe(topic.as_str(), to_wire(qos)) {
            Ok(()) => info!("subscribed to {}", topic),
            Err(e) => warn!("subscribe to {} failed: {}", topic, e),
        }
    }
}


// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

fn to_wire(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

/// Host, port and TLS flag from a `tcp://`, `mqtt://`, `ssl://` or `mqtts://` URL.
pub fn parse_broker(broker: &str) -> Result<(String, u16, bool)> {
    let url = Url::parse(broker)
        .map_err(|e| Error::Config(format!("invalid broker URL '{}': {}", broker, e)))?;
    let tls = match url.scheme() {
        "tcp" | "mqtt" => false,
        "ssl" | "tls" | "mqtts" => true,
        other => {
            return Err(Error::Config(format!("unsupported broker scheme '{}'", other)));
        }
    };
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::Config(format!("broker URL '{}' has no host", broker)))?
        .to_string();
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });
    Ok((host, port, tls))
}

pub fn client_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("gator-{}", secs)
}

fn build_options(config: &MqttConfig) -> Result<MqttOptions> {
    let (host, port, tls_scheme) = parse_broker(&config.broker)?;
    let mut options = MqttOptions::new(client_id(), host.clone(), port);
    options.set_keep_alive(KEEP_ALIVE);

    if config.username.is_some() || config.password.is_some() {
        options.set_credentials(
            config.username.clone().unwrap_or_default(),
            config.password.clone().unwrap_or_default(),
        );
    }

    if config.secure || tls_scheme {
        options.set_transport(rumqttc::Transport::Tls(tls_configuration(config, &host)?));
    }
    Ok(options)
}

fn tls_configuration(config: &MqttConfig, host: &str) -> Result<TlsConfiguration> {
    let ca_path = config
        .ca_cert
        .as_deref()
        .ok_or_else(|| Error::Config("secure MQTT requires caCert".into()))?;
    let ca = std::fs::read(ca_path)
        .map_err(|e| Error::Config(format!("reading CA certificate {}: {}", ca_path, e)))?;

    let client_auth = match (&config.client_cert, &config.client_key) {
        (Some(cert), Some(key)) => {
            let cert = std::fs::read(cert)
                .map_err(|e| Error::Config(format!("reading client certificate {}: {}", cert, e)))?;
            let key = std::fs::read(key)
                .map_err(|e| Error::Config(format!("reading client key {}: {}", key, e)))?;
            Some((cert, key))
        }
        (None, None) => None,
        _ => return Err(Error::Config("clientCert and clientKey must be given together".into())),
    };

    if let Some(name) = config.ca_server_hostname.as_deref() {
        if name != host {
            warn!("caServerHostname '{}' differs from broker host '{}'; verifying against the broker host", name, host);
        }
    }

    Ok(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    })
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
