//! Registration status derived from the credentials currently configured.

use serde::Serialize;

use crate::credentials::*;
use crate::provider::Provider;

/// Whether provisioning has delivered a provider's credentials.
///
/// `Partial` means some but not all fields are present. It is not an error:
/// the credentials are still being written and the next cycle should see
/// them complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Unregistered,
    Partial,
    Complete,
}

/// Fields that must all be present before a provider can connect.
pub fn required_fields(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Aws => &[AWS_PRIVATE_KEY, AWS_CERT, AWS_ROOT_CA],
        Provider::Azure => &[AZURE_PRIVATE_KEY, AZURE_CERT, AZURE_ROOT_CA],
        Provider::Gcp => &[
            GCP_PRIVATE_KEY,
            GCP_PROJECT_ID,
            GCP_REGION,
            GCP_REGISTRY_ID,
            GCP_ROOT_CERT,
        ],
    }
}

/// Classify the credential state for `provider`.
pub fn classify(provider: Provider, credentials: &CredentialStore) -> RegistrationStatus {
    let required = required_fields(provider);
    let present = required
        .iter()
        .filter(|key| credentials.contains(key))
        .count();

    if present == required.len() {
        RegistrationStatus::Complete
    } else if present == 0 {
        RegistrationStatus::Unregistered
    } else {
        RegistrationStatus::Partial
    }
}
