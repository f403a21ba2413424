//! Client for the device supervisor's update endpoint.
//!
//! After the provisioning service reports the device as already registered,
//! its credentials exist in the fleet but not yet in this container's
//! environment. Forcing a supervisor update restarts the service with the
//! current variables applied.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::config::SupervisorConfig;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("supervisor address or API key is not configured")]
    Unconfigured,

    #[error("supervisor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("supervisor returned {0}")]
    Status(StatusCode),
}

/// Asks the runtime to reload this service's environment.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> Result<(), RefreshError>;
}

#[derive(Serialize)]
struct UpdateRequest {
    force: bool,
}

/// Production refresher backed by the supervisor HTTP API.
pub struct SupervisorClient {
    client: reqwest::Client,
    config: Option<SupervisorConfig>,
    timeout: Duration,
}

impl SupervisorClient {
    pub fn new(config: Option<SupervisorConfig>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            timeout,
        }
    }
}

#[async_trait]
impl Refresher for SupervisorClient {
    async fn refresh(&self) -> Result<(), RefreshError> {
        let config = self.config.as_ref().ok_or(RefreshError::Unconfigured)?;
        let url = format!("{}/v1/update", config.address.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .query(&[("apikey", config.api_key.as_str())])
            .json(&UpdateRequest { force: true })
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Status(status));
        }

        tracing::info!(%status, "supervisor update requested");
        Ok(())
    }
}
