//! Relay agent configuration, loaded once from the environment.
//!
//! Every computed default (provider auto-detection, token renewal margin,
//! topics) is resolved here and stored in the returned value; nothing is
//! written back to the process environment.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use cr_mqtt_channel::MqttSettings;
use cr_mqtt_channel::config::PLAINTEXT_PORT;
use cr_protocol::credentials::AZURE_HUB_HOST;
use cr_protocol::topics::DEFAULT_PRODUCER_TOPIC;
use cr_protocol::{CredentialStore, DeviceIdentity, Provider, ProviderParseError, required_fields};
use thiserror::Error;

use crate::messenger::token::TokenPolicy;
use crate::retry::RetryPolicy;

pub const DEVICE_UUID: &str = "BALENA_DEVICE_UUID";
pub const LEGACY_DEVICE_UUID: &str = "RESIN_DEVICE_UUID";
pub const CLOUD_PROVIDER: &str = "CLOUD_PROVIDER";
pub const PROVISION_URL: &str = "PROVISION_URL";
pub const PROVISION_TIMEOUT_SECS: &str = "PROVISION_TIMEOUT_SECS";
pub const SERVICE_NAME: &str = "BALENA_SERVICE_NAME";
pub const SUPERVISOR_ADDRESS: &str = "BALENA_SUPERVISOR_ADDRESS";
pub const SUPERVISOR_API_KEY: &str = "BALENA_SUPERVISOR_API_KEY";
pub const PRODUCER_TOPIC: &str = "PRODUCER_TOPIC";
pub const CLOUD_CONSUMER_TOPIC: &str = "CLOUD_CONSUMER_TOPIC";
pub const GCP_TOKEN_LIFETIME: &str = "GCP_TOKEN_LIFETIME";
pub const GCP_TOKEN_RENEWAL_MARGIN: &str = "GCP_TOKEN_RENEWAL_MARGIN";

/// Local message bus endpoint. Fixed: the broker runs beside the relay.
pub const LOCAL_BROKER_HOST: &str = "localhost";
pub const LOCAL_BROKER_PORT: u16 = PLAINTEXT_PORT;

const DEFAULT_PROVISION_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting '{0}' is not set")]
    Missing(&'static str),

    #[error(transparent)]
    UnknownProvider(#[from] ProviderParseError),

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Local producer topic and cloud consumer topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMapping {
    /// Topic subscribed to on the local broker.
    pub producer: String,
    /// Cloud publish topic. `None` selects the provider default.
    pub consumer: Option<String>,
}

/// Supervisor API used to refresh environment variables after provisioning.
#[derive(Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub address: String,
    pub api_key: String,
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("address", &self.address)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Top-level configuration for the relay agent.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub device: DeviceIdentity,
    pub credentials: CredentialStore,
    /// Provisioning endpoint. Only required while unregistered.
    pub provisioning_url: Option<String>,
    pub provision_timeout: Duration,
    /// Service name forwarded to the provisioning API.
    pub service_name: Option<String>,
    pub supervisor: Option<SupervisorConfig>,
    pub topics: TopicMapping,
    /// Local broker connection settings.
    pub local_broker: MqttSettings,
    /// GCP token lifetime and renewal margin.
    pub token_policy: TokenPolicy,
    /// Shared by the local connect and GCP reconnect paths.
    pub retry: RetryPolicy,
}

impl RelayConfig {
    /// Load config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load config from an environment-like set of key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string());

        let uuid = get(DEVICE_UUID)
            .or_else(|| get(LEGACY_DEVICE_UUID))
            .ok_or(ConfigError::Missing(DEVICE_UUID))?;

        let credentials = CredentialStore::from_vars(vars.iter());
        let provider = match get(CLOUD_PROVIDER) {
            Some(selector) => selector.parse::<Provider>()?,
            None => detect_provider(&credentials),
        };

        let supervisor = match (get(SUPERVISOR_ADDRESS), get(SUPERVISOR_API_KEY)) {
            (Some(address), Some(api_key)) => Some(SupervisorConfig { address, api_key }),
            _ => None,
        };

        let provision_timeout = Duration::from_secs(
            parse_number(&vars, PROVISION_TIMEOUT_SECS)?.unwrap_or(DEFAULT_PROVISION_TIMEOUT_SECS),
        );

        // Token settings only matter to GCP; other backends ignore them.
        let token_policy = if provider == Provider::Gcp {
            TokenPolicy::from_minutes(
                parse_number(&vars, GCP_TOKEN_LIFETIME)?
                    .unwrap_or(TokenPolicy::DEFAULT_LIFETIME_MINUTES),
                parse_number(&vars, GCP_TOKEN_RENEWAL_MARGIN)?,
            )?
        } else {
            TokenPolicy::default()
        };

        let retry = RetryPolicy::default();
        let local_broker =
            MqttSettings::new(LOCAL_BROKER_HOST, LOCAL_BROKER_PORT, format!("cloud-relay-{uuid}"))
                .with_reconnect(retry.attempts, retry.delay);

        Ok(Self {
            device: DeviceIdentity::new(uuid, provider),
            credentials,
            provisioning_url: get(PROVISION_URL),
            provision_timeout,
            service_name: get(SERVICE_NAME),
            supervisor,
            topics: TopicMapping {
                producer: get(PRODUCER_TOPIC).unwrap_or_else(|| DEFAULT_PRODUCER_TOPIC.to_string()),
                consumer: get(CLOUD_CONSUMER_TOPIC),
            },
            local_broker,
            token_policy,
            retry,
        })
    }
}

/// Pick a provider from whichever identity fields are present.
///
/// GCP and Azure are checked first; AWS is the fallback because it was the
/// only backend before provider selection existed.
fn detect_provider(credentials: &CredentialStore) -> Provider {
    let has_any = |provider: Provider, host_key: Option<&str>| {
        required_fields(provider)
            .iter()
            .any(|key| credentials.contains(key))
            || host_key.is_some_and(|key| credentials.contains(key))
    };

    if has_any(Provider::Gcp, None) {
        Provider::Gcp
    } else if has_any(Provider::Azure, Some(AZURE_HUB_HOST)) {
        Provider::Azure
    } else {
        Provider::Aws
    }
}

fn parse_number(vars: &HashMap<String, String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    vars.get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key,
                reason: format!("'{raw}' is not a whole number: {e}"),
            })
        })
        .transpose()
}
