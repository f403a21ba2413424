//! One relay cycle: check registration, provision or connect, then forward.
//!
//! The registration status is evaluated once per cycle. An unregistered
//! device only provisions (the credentials arrive with the restart that
//! follows), a partially registered one waits, and a complete one connects
//! both links and forwards every local message to the cloud in order.

use std::fmt;
use std::sync::Arc;

use cr_mqtt_channel::{Connector, InboundMessage};
use cr_protocol::RegistrationStatus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::error::RelayResult;
use crate::local_link::{LinkState, LocalBrokerClient};
use crate::messenger::{CloudMessenger, Delivery, MessengerError, RenewalHandle};
use crate::provision::{ProvisionOutcome, Provisioner};
use crate::supervisor::Refresher;

/// How a cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The device was unregistered; provisioning reached the service.
    Provisioning(ProvisionOutcome),
    /// Some but not all credentials are present.
    AwaitingCredentials,
    /// Registered, but the local broker could not be reached.
    LocalUnavailable,
    /// Both links are up and messages are being forwarded.
    Relaying(RelayHandle),
}

/// Why a running relay stopped.
#[derive(Debug)]
pub enum RelayExit {
    /// The local message stream ended.
    LocalClosed,
    /// The cloud connection could not be renewed.
    RenewalExhausted(MessengerError),
}

/// A running relay. Dropping it stops forwarding and renewal.
pub struct RelayHandle {
    cloud_topic: String,
    forwarder: JoinHandle<()>,
    renewal: Option<RenewalHandle>,
}

impl RelayHandle {
    pub fn cloud_topic(&self) -> &str {
        &self.cloud_topic
    }

    /// Run until the local stream closes or renewal gives up.
    pub async fn wait(mut self) -> RelayExit {
        let forwarder = &mut self.forwarder;
        match self.renewal.as_mut() {
            Some(renewal) => tokio::select! {
                _ = forwarder => RelayExit::LocalClosed,
                err = renewal.exhausted() => RelayExit::RenewalExhausted(err),
            },
            None => {
                let _ = forwarder.await;
                RelayExit::LocalClosed
            }
        }
    }
}

impl fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHandle")
            .field("cloud_topic", &self.cloud_topic)
            .field("renewal", &self.renewal.is_some())
            .finish()
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

pub struct Orchestrator {
    config: RelayConfig,
    provisioner: Provisioner,
    local: LocalBrokerClient,
    messenger: CloudMessenger,
}

impl Orchestrator {
    pub fn new(
        config: RelayConfig,
        local_connector: Arc<dyn Connector>,
        cloud_connector: Arc<dyn Connector>,
        refresher: Arc<dyn Refresher>,
    ) -> Self {
        Self {
            provisioner: Provisioner::new(&config, refresher),
            local: LocalBrokerClient::new(&config, local_connector),
            messenger: CloudMessenger::select(&config, cloud_connector),
            config,
        }
    }

    pub fn messenger(&self) -> &CloudMessenger {
        &self.messenger
    }

    pub async fn run_cycle(&mut self) -> RelayResult<CycleOutcome> {
        let uuid = self.config.device.uuid.as_str();
        let provider = self.messenger.provider();

        match self.messenger.registration_status() {
            RegistrationStatus::Unregistered => {
                tracing::info!(uuid, %provider, "device not registered");
                let outcome = self.provisioner.provision(uuid).await?;
                Ok(CycleOutcome::Provisioning(outcome))
            }
            RegistrationStatus::Partial => {
                tracing::warn!(uuid, %provider, "registration incomplete, waiting for credentials");
                Ok(CycleOutcome::AwaitingCredentials)
            }
            RegistrationStatus::Complete => {
                if self.local.connect_and_subscribe().await == LinkState::Disconnected {
                    return Ok(CycleOutcome::LocalUnavailable);
                }

                let Some(inbound) = self.local.take_inbound() else {
                    tracing::warn!("local message stream already taken");
                    return Ok(CycleOutcome::LocalUnavailable);
                };

                let cloud_topic = self.messenger.create_consumer_topic();
                let renewal = self.messenger.connect().await?;

                tracing::info!(
                    uuid,
                    %provider,
                    producer = %self.local.topic(),
                    consumer = %cloud_topic,
                    "relaying local messages to cloud"
                );
                let forwarder = tokio::spawn(forward(
                    inbound,
                    self.messenger.clone(),
                    cloud_topic.clone(),
                ));

                Ok(CycleOutcome::Relaying(RelayHandle {
                    cloud_topic,
                    forwarder,
                    renewal,
                }))
            }
        }
    }
}

/// Forward every local message, in arrival order, to the cloud topic.
async fn forward(
    mut inbound: mpsc::Receiver<InboundMessage>,
    messenger: CloudMessenger,
    cloud_topic: String,
) {
    while let Some(message) = inbound.recv().await {
        tracing::debug!(
            local_topic = %message.topic,
            bytes = message.payload.len(),
            "relaying message"
        );
        if messenger.publish(&cloud_topic, &message.payload).await == Delivery::Dropped {
            tracing::debug!(local_topic = %message.topic, "message not relayed");
        }
    }
    tracing::info!("local message stream closed");
}
