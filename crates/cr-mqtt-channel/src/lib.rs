//! MQTT plumbing shared by the local broker link and the cloud messengers.
//!
//! - `Channel` trait for publish/subscribe on one live connection
//! - `Connector` trait for establishing connections (mockable in tests)
//! - `RumqttConnector`/`MqttChannel` backed by rumqttc with optional TLS
//! - `MockConnector`/`MockChannel` for testing without a broker

pub mod channel;
pub mod config;
pub mod connector;
pub mod error;
pub mod mock;
pub mod tls;

// Re-exports for convenience.
pub use channel::{Channel, InboundMessage, MqttChannel};
pub use config::{MqttSettings, TlsMaterial};
pub use connector::{Connector, RumqttConnector, Session};
pub use error::{MqttError, MqttResult};
pub use mock::{MockChannel, MockConnector};
pub use rumqttc::QoS;
