//! Cloud messaging behind one contract.
//!
//! `CloudMessenger` is a closed set of backends dispatched by `match`. Every
//! variant shares a `MessengerCore` holding the identity, credentials and
//! the live cloud link; the variants differ only in how they build
//! connection settings, name topics and (GCP) keep credentials fresh.

pub mod aws;
pub mod azure;
pub mod gcp;
pub mod token;

use std::future::Future;
use std::sync::Arc;

use cr_mqtt_channel::{Channel, Connector, MqttError, MqttSettings, QoS};
use cr_protocol::{
    CredentialError, CredentialStore, DeviceIdentity, Provider, RegistrationStatus, classify,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

pub use aws::AwsMessenger;
pub use azure::AzureMessenger;
pub use gcp::GcpMessenger;

use crate::config::RelayConfig;

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("failed to sign connection token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("cloud connection failed: {0}")]
    Connection(#[from] MqttError),

    #[error("connection renewal gave up after {attempts} attempts: {source}")]
    RenewalExhausted {
        attempts: u32,
        #[source]
        source: Box<MessengerError>,
    },

    #[error("renewal task stopped: {0}")]
    RenewalStopped(String),
}

/// Convenience alias.
pub type MessengerResult<T> = Result<T, MessengerError>;

/// What happened to a relayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the cloud client for at-least-once delivery.
    Sent,
    /// Discarded: no live connection or the client refused it.
    Dropped,
}

// ── CloudLink ─────────────────────────────────────────────────

/// The current cloud channel, swapped by connect and renewal.
#[derive(Default)]
pub struct CloudLink {
    channel: RwLock<Option<Arc<dyn Channel>>>,
}

impl CloudLink {
    /// Install `channel`, returning the one it replaces.
    pub async fn replace(&self, channel: Option<Arc<dyn Channel>>) -> Option<Arc<dyn Channel>> {
        std::mem::replace(&mut *self.channel.write().await, channel)
    }

    pub async fn is_connected(&self) -> bool {
        self.channel
            .read()
            .await
            .as_ref()
            .is_some_and(|c| c.is_connected())
    }

    pub async fn publish(&self, provider: Provider, topic: &str, payload: &[u8]) -> Delivery {
        let channel = self.channel.read().await.clone();
        let Some(channel) = channel.filter(|c| c.is_connected()) else {
            tracing::warn!(%provider, topic, "not connected to cloud, message dropped");
            return Delivery::Dropped;
        };

        match channel.publish(topic, payload, QoS::AtLeastOnce).await {
            Ok(()) => {
                tracing::debug!(%provider, topic, bytes = payload.len(), "published to cloud");
                Delivery::Sent
            }
            Err(e) => {
                tracing::warn!(%provider, topic, error = %e, "cloud publish failed, message dropped");
                Delivery::Dropped
            }
        }
    }

    /// Close and forget the current channel, if any.
    pub async fn close(&self) {
        if let Some(channel) = self.replace(None).await {
            if let Err(e) = channel.disconnect().await {
                tracing::warn!(error = %e, "error closing cloud connection");
            }
        }
    }
}

// ── MessengerCore ─────────────────────────────────────────────

/// State shared by every backend.
#[derive(Clone)]
pub struct MessengerCore {
    pub(crate) device: DeviceIdentity,
    pub(crate) credentials: CredentialStore,
    pub(crate) consumer_topic: Option<String>,
    connector: Arc<dyn Connector>,
    link: Arc<CloudLink>,
}

impl MessengerCore {
    fn new(config: &RelayConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            device: config.device.clone(),
            credentials: config.credentials.clone(),
            consumer_topic: config.topics.consumer.clone(),
            connector,
            link: Arc::new(CloudLink::default()),
        }
    }

    pub fn link(&self) -> &Arc<CloudLink> {
        &self.link
    }

    /// Connect with `settings` and make the result the live channel.
    pub(crate) async fn open(&self, settings: &MqttSettings) -> MessengerResult<()> {
        // Cloud-to-device messages are not consumed; the inbound stream is dropped.
        let session = self.connector.connect(settings).await?;
        tracing::info!(
            provider = %self.device.provider,
            host = %settings.host,
            client_id = %settings.client_id,
            "connected to cloud"
        );
        if let Some(previous) = self.link.replace(Some(session.channel)).await {
            if let Err(e) = previous.disconnect().await {
                tracing::warn!(error = %e, "error closing replaced cloud connection");
            }
        }
        Ok(())
    }
}

// ── RenewalHandle ─────────────────────────────────────────────

/// Owns a background credential renewal task.
///
/// The task only finishes when renewal gives up; dropping the handle
/// aborts it.
#[derive(Debug)]
pub struct RenewalHandle {
    task: JoinHandle<MessengerError>,
}

impl RenewalHandle {
    pub(crate) fn spawn<F>(renewal: F) -> Self
    where
        F: Future<Output = MessengerError> + Send + 'static,
    {
        Self {
            task: tokio::spawn(renewal),
        }
    }

    /// Wait until renewal gives up and return why.
    pub async fn exhausted(&mut self) -> MessengerError {
        match (&mut self.task).await {
            Ok(err) => err,
            Err(e) => MessengerError::RenewalStopped(e.to_string()),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ── CloudMessenger ────────────────────────────────────────────

/// The configured cloud backend.
#[derive(Clone)]
pub enum CloudMessenger {
    Aws(AwsMessenger),
    Gcp(GcpMessenger),
    Azure(AzureMessenger),
}

impl CloudMessenger {
    /// Build the messenger for the configured provider.
    pub fn select(config: &RelayConfig, connector: Arc<dyn Connector>) -> Self {
        let core = MessengerCore::new(config, connector);
        match config.device.provider {
            Provider::Aws => CloudMessenger::Aws(AwsMessenger::new(core)),
            Provider::Gcp => CloudMessenger::Gcp(GcpMessenger::new(
                core,
                config.token_policy,
                config.retry,
            )),
            Provider::Azure => CloudMessenger::Azure(AzureMessenger::new(core)),
        }
    }

    fn core(&self) -> &MessengerCore {
        match self {
            CloudMessenger::Aws(m) => m.core(),
            CloudMessenger::Gcp(m) => m.core(),
            CloudMessenger::Azure(m) => m.core(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.core().device.provider
    }

    /// Evaluated on every call; credentials are never cached as a status.
    pub fn registration_status(&self) -> RegistrationStatus {
        classify(self.provider(), &self.core().credentials)
    }

    pub fn is_unregistered(&self) -> bool {
        self.registration_status() == RegistrationStatus::Unregistered
    }

    pub fn is_registration_complete(&self) -> bool {
        self.registration_status() == RegistrationStatus::Complete
    }

    pub fn default_consumer_topic(&self) -> String {
        match self {
            CloudMessenger::Aws(m) => m.default_consumer_topic(),
            CloudMessenger::Gcp(m) => m.default_consumer_topic(),
            CloudMessenger::Azure(m) => m.default_consumer_topic(),
        }
    }

    /// Map a configured topic onto the backend's topic namespace.
    pub fn finalize_consumer_topic(&self, topic: &str) -> String {
        match self {
            CloudMessenger::Gcp(m) => m.finalize_consumer_topic(topic),
            CloudMessenger::Aws(_) | CloudMessenger::Azure(_) => topic.to_string(),
        }
    }

    /// The topic every relayed message is published to.
    pub fn create_consumer_topic(&self) -> String {
        let topic = self
            .core()
            .consumer_topic
            .clone()
            .unwrap_or_else(|| self.default_consumer_topic());
        self.finalize_consumer_topic(&topic)
    }

    /// Connect to the cloud. GCP also returns the handle of its renewal task.
    pub async fn connect(&self) -> MessengerResult<Option<RenewalHandle>> {
        match self {
            CloudMessenger::Aws(m) => m.connect().await.map(|()| None),
            CloudMessenger::Gcp(m) => m.connect().await.map(Some),
            CloudMessenger::Azure(m) => m.connect().await.map(|()| None),
        }
    }

    /// Publish at least once. Never fails; undeliverable messages are dropped.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Delivery {
        self.core()
            .link
            .publish(self.provider(), topic, payload)
            .await
    }

    pub async fn is_connected(&self) -> bool {
        self.core().link.is_connected().await
    }

    pub async fn disconnect(&self) {
        self.core().link.close().await;
    }
}
