//! Message-bus integration.
//!
//! `mapping` holds the configuration types, `transport` the broker contract,
//! `mqtt` the `rumqttc` implementation, and `bridge` the logic tying bus
//! traffic to model writes.

pub mod bridge;
pub mod mapping;
pub mod mqtt;
pub mod transport;

pub use bridge::{decode_payload, BusBridge, WriteOrigin};
pub use mapping::{BusMapping, MqttConfig, MqttPath, PublishType, QoS};
pub use mqtt::MqttTransport;
pub use transport::{Delivery, InboundMessage, Transport};
