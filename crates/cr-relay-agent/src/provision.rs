//! Device provisioning against the fleet's provisioning service.
//!
//! A single POST asks the service to create the device in the selected
//! cloud and write the resulting credentials back as service variables.
//! Each provider reports "already registered" differently; that case is
//! not a failure, but the credentials still have to reach this container,
//! so the supervisor is asked to refresh the environment.

use std::sync::Arc;
use std::time::Duration;

use cr_protocol::Provider;
use reqwest::StatusCode;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, PROVISION_URL, RelayConfig};
use crate::supervisor::Refresher;

/// AWS provisioning replies with exactly this body for a known thing.
const AWS_ALREADY_EXISTS: &str = "thing already exists";
/// Prefix of the Azure IoT Hub error name for a known device.
const AZURE_ALREADY_EXISTS: &str = "DeviceAlreadyExistsError";
/// gRPC `ALREADY_EXISTS`, reported by Cloud IoT Core in a JSON `code` field.
const GCP_ALREADY_EXISTS_CODE: i64 = 6;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("provisioning request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provisioning rejected with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Result of a provisioning attempt that reached the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The device was created; credentials will arrive with the next restart.
    Provisioned,
    /// The device already existed; an environment refresh was requested.
    AlreadyRegistered,
}

impl ProvisionOutcome {
    /// Whether this attempt created the device.
    pub fn succeeded(&self) -> bool {
        matches!(self, ProvisionOutcome::Provisioned)
    }
}

#[derive(Debug, Serialize)]
struct ProvisionRequest<'a> {
    uuid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    balena_service: Option<&'a str>,
}

#[derive(Deserialize)]
struct GcpErrorBody {
    code: i64,
}

pub struct Provisioner {
    client: reqwest::Client,
    url: Option<String>,
    provider: Provider,
    service_name: Option<String>,
    timeout: Duration,
    refresher: Arc<dyn Refresher>,
}

impl Provisioner {
    pub fn new(config: &RelayConfig, refresher: Arc<dyn Refresher>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.provisioning_url.clone(),
            provider: config.device.provider,
            service_name: config.service_name.clone(),
            timeout: config.provision_timeout,
            refresher,
        }
    }

    /// Register `uuid` with the provisioning service.
    pub async fn provision(&self, uuid: &str) -> Result<ProvisionOutcome, ProvisionError> {
        let url = self
            .url
            .as_deref()
            .ok_or(ConfigError::Missing(PROVISION_URL))?;

        let body = request_body(self.provider, uuid, self.service_name.as_deref());
        tracing::info!(uuid, provider = %self.provider, url, "provisioning device");

        let response = self
            .client
            .post(url)
            .header(CACHE_CONTROL, "no-cache")
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(uuid, %status, "device provisioned");
            return Ok(ProvisionOutcome::Provisioned);
        }

        let text = response.text().await.unwrap_or_default();
        if is_already_registered(self.provider, &text) {
            tracing::info!(uuid, %status, "device already registered, refreshing environment");
            if let Err(e) = self.refresher.refresh().await {
                tracing::warn!(error = %e, "environment refresh failed");
            }
            return Ok(ProvisionOutcome::AlreadyRegistered);
        }

        tracing::error!(uuid, %status, body = %text, "provisioning rejected");
        Err(ProvisionError::Rejected { status, body: text })
    }
}

fn request_body<'a>(
    provider: Provider,
    uuid: &'a str,
    service_name: Option<&'a str>,
) -> ProvisionRequest<'a> {
    ProvisionRequest {
        uuid,
        provider: match provider {
            Provider::Aws => None,
            Provider::Gcp | Provider::Azure => Some(provider),
        },
        balena_service: service_name,
    }
}

/// Whether a non-2xx response body means the device already exists.
fn is_already_registered(provider: Provider, body: &str) -> bool {
    match provider {
        Provider::Aws => body == AWS_ALREADY_EXISTS,
        Provider::Azure => body.starts_with(AZURE_ALREADY_EXISTS),
        Provider::Gcp => serde_json::from_str::<GcpErrorBody>(body)
            .is_ok_and(|e| e.code == GCP_ALREADY_EXISTS_CODE),
    }
}
