//! Mock MQTT channel and connector for testing without a real broker.
//!
//! `MockChannel` records all published messages and subscription filters;
//! `MockConnector` hands out mock sessions, can be scripted to refuse
//! connections, and injects inbound messages into the latest session.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rumqttc::QoS;
use tokio::sync::mpsc;

use crate::channel::{Channel, InboundMessage};
use crate::config::MqttSettings;
use crate::connector::{Connector, Session};
use crate::error::{MqttError, MqttResult};

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Mock implementation of the `Channel` trait.
///
/// Stores all publishes and subscriptions in memory for test verification.
/// Thread-safe via `Mutex` (fine for test contexts).
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    disconnect_fails: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            disconnects: AtomicUsize::new(0),
            disconnect_fails: AtomicBool::new(false),
        }
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Get all subscription filters.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Get the last published message.
    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.published.lock().unwrap().last().cloned()
    }

    /// Check whether a subscription was made to the given filter.
    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .any(|(f, _)| f == filter)
    }

    /// Simulate the broker dropping (or restoring) the session.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make `disconnect` report an error (the channel still closes).
    pub fn set_disconnect_fails(&self, fails: bool) {
        self.disconnect_fails.store(fails, Ordering::SeqCst);
    }

    /// Number of `disconnect` calls.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        if !self.is_connected() {
            return Err(MqttError::Publish("mock channel is disconnected".into()));
        }
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .push((filter.to_string(), qos));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> MqttResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.disconnect_fails.load(Ordering::SeqCst) {
            return Err(MqttError::Connection("mock disconnect failed".into()));
        }
        Ok(())
    }
}

// ── MockConnector ─────────────────────────────────────────────

/// Mock implementation of the `Connector` trait.
///
/// Every `connect` call is recorded (including refused ones). Successful
/// calls create a fresh `MockChannel`; the most recent session's inbound
/// stream can be fed with [`MockConnector::deliver`].
pub struct MockConnector {
    always_fail: AtomicBool,
    failures_remaining: AtomicUsize,
    attempts: Mutex<Vec<MqttSettings>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    inbound: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MockConnector {
    /// A connector whose connections always succeed.
    pub fn new() -> Self {
        Self {
            always_fail: AtomicBool::new(false),
            failures_remaining: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            inbound: Mutex::new(None),
        }
    }

    /// A connector whose connections are always refused.
    pub fn failing() -> Self {
        let connector = Self::new();
        connector.set_failing(true);
        connector
    }

    pub fn set_failing(&self, failing: bool) {
        self.always_fail.store(failing, Ordering::SeqCst);
    }

    /// Refuse the next `n` connection attempts, then succeed again.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Total connect calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Settings passed to each connect call, in order.
    pub fn settings(&self) -> Vec<MqttSettings> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn last_settings(&self) -> Option<MqttSettings> {
        self.attempts.lock().unwrap().last().cloned()
    }

    /// Channels created by successful connects, in order.
    pub fn channels(&self) -> Vec<Arc<MockChannel>> {
        self.channels.lock().unwrap().clone()
    }

    pub fn last_channel(&self) -> Option<Arc<MockChannel>> {
        self.channels.lock().unwrap().last().cloned()
    }

    /// Push a message into the latest session's inbound stream.
    ///
    /// Returns `false` if there is no session or its receiver was dropped.
    pub async fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        let sender = self.inbound.lock().unwrap().clone();
        let Some(sender) = sender else {
            return false;
        };
        sender
            .send(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            })
            .await
            .is_ok()
    }

    fn should_fail(&self) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, settings: &MqttSettings) -> MqttResult<Session> {
        self.attempts.lock().unwrap().push(settings.clone());

        if self.should_fail() {
            return Err(MqttError::Connection(format!(
                "mock connection to {}:{} refused",
                settings.host, settings.port
            )));
        }

        let channel = Arc::new(MockChannel::new());
        let (tx, rx) = mpsc::channel(64);
        self.channels.lock().unwrap().push(channel.clone());
        *self.inbound.lock().unwrap() = Some(tx);

        Ok(Session {
            channel,
            inbound: rx,
        })
    }
}
