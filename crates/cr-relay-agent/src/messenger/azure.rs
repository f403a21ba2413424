//! Azure IoT Hub: X.509 device authentication over MQTT.

use cr_mqtt_channel::config::TLS_PORT;
use cr_mqtt_channel::{MqttSettings, TlsMaterial};
use cr_protocol::credentials::{AZURE_CERT, AZURE_HUB_HOST, AZURE_PRIVATE_KEY, AZURE_ROOT_CA};
use cr_protocol::topics::{azure_default_topic, azure_username};

use super::{MessengerCore, MessengerResult};

#[derive(Clone)]
pub struct AzureMessenger {
    core: MessengerCore,
}

impl AzureMessenger {
    pub(crate) fn new(core: MessengerCore) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &MessengerCore {
        &self.core
    }

    /// IoT Hub wants the device id as client id and a versioned username;
    /// the password is unused with certificate authentication.
    pub fn settings(&self) -> MessengerResult<MqttSettings> {
        let creds = &self.core.credentials;
        let uuid = &self.core.device.uuid;
        let host = creds.require(AZURE_HUB_HOST)?;
        let tls = TlsMaterial {
            ca: creds.decode(AZURE_ROOT_CA)?,
            client_auth: Some((creds.decode(AZURE_CERT)?, creds.decode(AZURE_PRIVATE_KEY)?)),
        };
        Ok(MqttSettings::new(host, TLS_PORT, uuid.clone())
            .with_credentials(azure_username(host, uuid), "")
            .with_tls(tls))
    }

    pub fn default_consumer_topic(&self) -> String {
        azure_default_topic(&self.core.device.uuid)
    }

    pub async fn connect(&self) -> MessengerResult<()> {
        self.core.open(&self.settings()?).await
    }
}
