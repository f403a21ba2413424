//! Connection to the local MQTT broker that sensor services publish to.

use std::sync::Arc;

use cr_mqtt_channel::{Channel, Connector, InboundMessage, MqttResult, MqttSettings, QoS};
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::retry::RetryPolicy;

/// Whether the local link is usable after a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

pub struct LocalBrokerClient {
    connector: Arc<dyn Connector>,
    settings: MqttSettings,
    topic: String,
    retry: RetryPolicy,
    channel: Option<Arc<dyn Channel>>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
}

impl LocalBrokerClient {
    pub fn new(config: &RelayConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            settings: config.local_broker.clone(),
            topic: config.topics.producer.clone(),
            retry: config.retry,
            channel: None,
            inbound: None,
        }
    }

    /// Producer topic subscribed to on the local broker.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> LinkState {
        match &self.channel {
            Some(channel) if channel.is_connected() => LinkState::Connected,
            _ => LinkState::Disconnected,
        }
    }

    /// Connect (unless already connected) and subscribe to the producer topic.
    ///
    /// Gives up after the retry policy is exhausted; the link is then reset
    /// and `Disconnected` is returned.
    pub async fn connect_and_subscribe(&mut self) -> LinkState {
        let existing = self.channel.clone().filter(|c| c.is_connected());
        let connector = self.connector.clone();
        let settings = &self.settings;
        let topic = self.topic.as_str();

        let result = self
            .retry
            .run("local broker connect", || {
                let existing = existing.clone();
                let connector = connector.clone();
                async move { open_and_subscribe(existing, connector.as_ref(), settings, topic).await }
            })
            .await;

        match result {
            Ok((channel, inbound)) => {
                tracing::info!(
                    host = %self.settings.host,
                    port = self.settings.port,
                    topic = %self.topic,
                    "subscribed to local broker"
                );
                self.channel = Some(channel);
                if inbound.is_some() {
                    self.inbound = inbound;
                }
                LinkState::Connected
            }
            Err(e) => {
                tracing::error!(
                    host = %self.settings.host,
                    port = self.settings.port,
                    error = %e,
                    "local broker unavailable"
                );
                self.channel = None;
                self.inbound = None;
                LinkState::Disconnected
            }
        }
    }

    /// Hand the stream of local messages to the relay. Yields it once per
    /// new connection.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound.take()
    }
}

/// One attempt: reuse a live channel or open a new one, then subscribe.
async fn open_and_subscribe(
    existing: Option<Arc<dyn Channel>>,
    connector: &dyn Connector,
    settings: &MqttSettings,
    topic: &str,
) -> MqttResult<(Arc<dyn Channel>, Option<mpsc::Receiver<InboundMessage>>)> {
    let (channel, inbound) = match existing {
        Some(channel) => (channel, None),
        None => {
            let session = connector.connect(settings).await?;
            (session.channel, Some(session.inbound))
        }
    };
    channel.subscribe(topic, QoS::AtLeastOnce).await?;
    Ok((channel, inbound))
}
