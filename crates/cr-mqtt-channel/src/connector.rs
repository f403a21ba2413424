//! Establishing MQTT sessions.
//!
//! A `Connector` turns `MqttSettings` into a live `Session`. The production
//! implementation waits for the broker's CONNACK before returning, so a
//! returned session is known to be connected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet};
use tokio::sync::mpsc;

use crate::channel::{Channel, InboundMessage, MqttChannel};
use crate::config::MqttSettings;
use crate::error::{MqttError, MqttResult};
use crate::tls;

/// Capacity of the rumqttc request queue and of the inbound stream.
const CHANNEL_CAPACITY: usize = 64;

/// A connected channel plus the stream of publishes it receives.
pub struct Session {
    pub channel: Arc<dyn Channel>,
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Opens MQTT sessions. Mockable so retry and renewal logic can be tested
/// without a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, settings: &MqttSettings) -> MqttResult<Session>;
}

/// Connector backed by `rumqttc::AsyncClient`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttConnector;

#[async_trait]
impl Connector for RumqttConnector {
    async fn connect(&self, settings: &MqttSettings) -> MqttResult<Session> {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keepalive_secs.into()));
        options.set_clean_session(true);
        if let Some((username, password)) = &settings.credentials {
            options.set_credentials(username, password);
        }
        options.set_transport(tls::transport(settings)?);

        let (client, mut eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);

        let timeout = Duration::from_secs(settings.connect_timeout_secs);
        tokio::time::timeout(timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| MqttError::Timeout(settings.connect_timeout_secs))??;

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            client_id = %settings.client_id,
            "MQTT connected"
        );

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let channel = MqttChannel::spawn(client, eventloop, settings, tx);

        Ok(Session {
            channel: Arc::new(channel),
            inbound: rx,
        })
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> MqttResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(MqttError::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(MqttError::Connection(e.to_string())),
        }
    }
}
