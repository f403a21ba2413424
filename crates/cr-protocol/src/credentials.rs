//! Provider credential keys and an immutable snapshot of their values.
//!
//! Provisioning writes these keys into the device's environment out of band,
//! so a `CredentialStore` is captured once per process start and never
//! written back.

use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

// ─── AWS IoT Core ───

pub const AWS_PRIVATE_KEY: &str = "AWS_PRIVATE_KEY";
pub const AWS_CERT: &str = "AWS_CERT";
pub const AWS_ROOT_CA: &str = "AWS_ROOT_CA";
pub const AWS_DATA_ENDPOINT: &str = "AWS_DATA_ENDPOINT";

// ─── Azure IoT Hub ───

pub const AZURE_PRIVATE_KEY: &str = "AZURE_PRIVATE_KEY";
pub const AZURE_CERT: &str = "AZURE_CERT";
pub const AZURE_ROOT_CA: &str = "AZURE_ROOT_CA";
pub const AZURE_HUB_HOST: &str = "AZURE_HUB_HOST";

// ─── Google Cloud IoT Core ───

pub const GCP_PRIVATE_KEY: &str = "GCP_PRIVATE_KEY";
pub const GCP_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const GCP_REGION: &str = "GCP_REGION";
pub const GCP_REGISTRY_ID: &str = "GCP_REGISTRY_ID";
pub const GCP_ROOT_CERT: &str = "GCP_ROOT_CERT";

/// Every key a `CredentialStore` captures.
pub const CREDENTIAL_KEYS: &[&str] = &[
    AWS_PRIVATE_KEY,
    AWS_CERT,
    AWS_ROOT_CA,
    AWS_DATA_ENDPOINT,
    AZURE_PRIVATE_KEY,
    AZURE_CERT,
    AZURE_ROOT_CA,
    AZURE_HUB_HOST,
    GCP_PRIVATE_KEY,
    GCP_PROJECT_ID,
    GCP_REGION,
    GCP_REGISTRY_ID,
    GCP_ROOT_CERT,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("credential '{0}' is not set")]
    Missing(&'static str),

    #[error("credential '{key}' is not valid base64: {reason}")]
    Encoding { key: &'static str, reason: String },
}

/// Read-only view over provider credentials.
///
/// Empty values are treated exactly like absent ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialStore {
    values: BTreeMap<&'static str, String>,
}

impl CredentialStore {
    /// Capture the credential keys present in `vars`, ignoring everything else.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut values = BTreeMap::new();
        for (key, value) in vars {
            let Some(known) = CREDENTIAL_KEYS.iter().find(|k| **k == key.as_ref()) else {
                continue;
            };
            let value = value.into();
            if !value.trim().is_empty() {
                values.insert(*known, value);
            }
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn require(&self, key: &'static str) -> Result<&str, CredentialError> {
        self.get(key).ok_or(CredentialError::Missing(key))
    }

    /// Base64-decode a credential (PEM material is shipped encoded).
    pub fn decode(&self, key: &'static str) -> Result<Vec<u8>, CredentialError> {
        let raw = self.require(key)?;
        let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        BASE64
            .decode(compact)
            .map_err(|e| CredentialError::Encoding {
                key,
                reason: e.to_string(),
            })
    }
}
