use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cloud IoT backend a device relays to. Exactly one per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Aws, Provider::Gcp, Provider::Azure];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a provider selector names none of the supported backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized cloud provider '{0}' (expected aws, gcp or azure)")]
pub struct ProviderParseError(pub String);

impl FromStr for Provider {
    type Err = ProviderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "gcp" => Ok(Provider::Gcp),
            "azure" => Ok(Provider::Azure),
            _ => Err(ProviderParseError(s.to_string())),
        }
    }
}

/// Per-process device identity. Built once from configuration, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device UUID assigned by the fleet manager.
    pub uuid: String,
    /// Selected cloud backend.
    pub provider: Provider,
}

impl DeviceIdentity {
    pub fn new(uuid: impl Into<String>, provider: Provider) -> Self {
        Self {
            uuid: uuid.into(),
            provider,
        }
    }
}
