//! AWS IoT Core: mutual TLS against the account's data endpoint.

use cr_mqtt_channel::config::TLS_PORT;
use cr_mqtt_channel::{MqttSettings, TlsMaterial};
use cr_protocol::credentials::{AWS_CERT, AWS_DATA_ENDPOINT, AWS_PRIVATE_KEY, AWS_ROOT_CA};
use cr_protocol::topics::AWS_DEFAULT_TOPIC;

use super::{MessengerCore, MessengerResult};

#[derive(Clone)]
pub struct AwsMessenger {
    core: MessengerCore,
}

impl AwsMessenger {
    pub(crate) fn new(core: MessengerCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &MessengerCore {
        &self.core
    }

    /// Thing name is the device uuid; the certificate is the identity.
    pub fn settings(&self) -> MessengerResult<MqttSettings> {
        let creds = &self.core.credentials;
        let host = creds.require(AWS_DATA_ENDPOINT)?;
        let tls = TlsMaterial {
            ca: creds.decode(AWS_ROOT_CA)?,
            client_auth: Some((creds.decode(AWS_CERT)?, creds.decode(AWS_PRIVATE_KEY)?)),
        };
        Ok(MqttSettings::new(host, TLS_PORT, self.core.device.uuid.clone()).with_tls(tls))
    }

    pub fn default_consumer_topic(&self) -> String {
        AWS_DEFAULT_TOPIC.to_string()
    }

    pub async fn connect(&self) -> MessengerResult<()> {
        self.core.open(&self.settings()?).await
    }
}
