//! MQTT channel: one live broker connection.
//!
//! Wraps `rumqttc::AsyncClient` and owns the task that drives its event
//! loop. Incoming publishes are forwarded, in broker order, to the
//! `InboundMessage` stream handed out with the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::config::MqttSettings;
use crate::error::{MqttError, MqttResult};

/// How long `disconnect` waits for the DISCONNECT packet to be flushed.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// A publish received from the broker. The payload is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

// ── Channel trait ─────────────────────────────────────────────

/// Abstraction for one MQTT connection.
///
/// Enables mocking in tests without a real MQTT broker.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish a raw payload to a topic.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()>;

    /// Whether the broker session is currently up.
    fn is_connected(&self) -> bool;

    /// Close the connection. The channel is unusable afterwards.
    async fn disconnect(&self) -> MqttResult<()>;
}

// ── MqttChannel ───────────────────────────────────────────────

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    closed: AtomicBool,
    subscriptions: Mutex<Vec<(String, QoS)>>,
}

/// rumqttc-backed channel. Created by `RumqttConnector` once CONNACK arrives.
pub struct MqttChannel {
    client: AsyncClient,
    client_id: String,
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttChannel {
    /// Take over a connected event loop and start driving it.
    pub(crate) fn spawn(
        client: AsyncClient,
        eventloop: EventLoop,
        settings: &MqttSettings,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Self {
        let shared = Arc::new(Shared::default());
        shared.connected.store(true, Ordering::SeqCst);

        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            Reconnect {
                client_id: settings.client_id.clone(),
                attempts: settings.reconnect_attempts,
                delay: settings.reconnect_delay,
            },
            shared.clone(),
            inbound,
        ));

        Self {
            client,
            client_id: settings.client_id.clone(),
            shared,
            driver: Mutex::new(Some(driver)),
        }
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        // Waits while the request queue is full; ordering is the caller's.
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))?;

        let mut subscriptions = self.shared.subscriptions.lock().await;
        if !subscriptions.iter().any(|(f, _)| f == filter) {
            subscriptions.push((filter.to_string(), qos));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);

        let result = self
            .client
            .try_disconnect()
            .map_err(|e| MqttError::Connection(e.to_string()));

        if let Some(mut handle) = self.driver.lock().await.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        tracing::debug!(client_id = %self.client_id, "MQTT channel closed");
        result
    }
}

impl Drop for MqttChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.get_mut().take() {
            handle.abort();
        }
    }
}

struct Reconnect {
    client_id: String,
    attempts: u32,
    delay: Duration,
}

/// Drive the event loop until the channel is closed.
///
/// rumqttc reconnects on the next `poll()` after an error; subscriptions
/// are replayed once the new CONNACK arrives. After `attempts` failed
/// reconnects in a row the channel is closed and `inbound` ends.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    reconnect: Reconnect,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<InboundMessage>,
) {
    let client_id = reconnect.client_id.as_str();
    let mut failed_attempts = 0u32;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                // Cloud sessions drop their receiver; nothing to deliver to.
                let _ = inbound.send(message).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                failed_attempts = 0;
                if !shared.connected.swap(true, Ordering::SeqCst) {
                    tracing::info!(client_id, "MQTT connection re-established");
                    for (filter, qos) in shared.subscriptions.lock().await.iter() {
                        if let Err(e) = client.try_subscribe(filter.as_str(), *qos) {
                            tracing::warn!(filter = %filter, error = %e, "failed to resubscribe");
                        }
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                if shared.connected.swap(false, Ordering::SeqCst) {
                    tracing::warn!(
                        client_id,
                        error = %e,
                        "MQTT connection lost, reconnecting in {}s",
                        reconnect.delay.as_secs()
                    );
                } else {
                    failed_attempts += 1;
                    if failed_attempts >= reconnect.attempts {
                        tracing::error!(
                            client_id,
                            attempts = failed_attempts,
                            error = %e,
                            "MQTT reconnect failed, closing channel"
                        );
                        shared.closed.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                tokio::time::sleep(reconnect.delay).await;
            }
        }
    }
}
