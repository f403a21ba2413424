//! Top-level error for one relay cycle.

use thiserror::Error;

use crate::config::ConfigError;
use crate::messenger::MessengerError;
use crate::provision::ProvisionError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("cloud messenger failed: {0}")]
    Messenger(#[from] MessengerError),
}

/// Convenience alias.
pub type RelayResult<T> = Result<T, RelayError>;
