//! GCP connection token: an ES256-signed JWT used as the MQTT password.
//!
//! Cloud IoT Core rejects a session once its token expires, so the
//! messenger reconnects with a fresh token `lifetime - margin` after every
//! successful connect.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, GCP_TOKEN_LIFETIME, GCP_TOKEN_RENEWAL_MARGIN};

/// Token lifetime and how long before expiry the connection is renewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub lifetime: Duration,
    pub margin: Duration,
}

impl TokenPolicy {
    pub const DEFAULT_LIFETIME_MINUTES: u64 = 60;
    pub const MIN_LIFETIME_MINUTES: u64 = 2;
    /// Cloud IoT Core refuses tokens valid for more than a day.
    pub const MAX_LIFETIME_MINUTES: u64 = 24 * 60;

    /// Build a policy from minute values.
    ///
    /// Without an explicit margin, long-lived tokens renew 5 minutes early
    /// and short-lived ones (10 minutes or less) 1 minute early.
    pub fn from_minutes(lifetime: u64, margin: Option<u64>) -> Result<Self, ConfigError> {
        if !(Self::MIN_LIFETIME_MINUTES..=Self::MAX_LIFETIME_MINUTES).contains(&lifetime) {
            return Err(ConfigError::Invalid {
                key: GCP_TOKEN_LIFETIME,
                reason: format!(
                    "{lifetime} minutes is outside {}..={}",
                    Self::MIN_LIFETIME_MINUTES,
                    Self::MAX_LIFETIME_MINUTES
                ),
            });
        }

        let margin = margin.unwrap_or(if lifetime > 10 { 5 } else { 1 });
        if margin == 0 || margin >= lifetime {
            return Err(ConfigError::Invalid {
                key: GCP_TOKEN_RENEWAL_MARGIN,
                reason: format!("{margin} minutes must be at least 1 and below the {lifetime} minute lifetime"),
            });
        }

        Ok(Self {
            lifetime: minutes(lifetime),
            margin: minutes(margin),
        })
    }

    /// Time from a successful connect until the connection is renewed.
    pub fn renewal_delay(&self) -> Duration {
        self.lifetime.saturating_sub(self.margin)
    }
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            lifetime: minutes(Self::DEFAULT_LIFETIME_MINUTES),
            margin: minutes(5),
        }
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

/// JWT claims expected by the Cloud IoT Core MQTT bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iat: i64,
    pub exp: i64,
    /// GCP project id.
    pub aud: String,
}

/// A signed token plus the window it is valid for.
#[derive(Clone)]
pub struct RenewalToken {
    jwt: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub audience: String,
}

impl RenewalToken {
    /// Sign a token for `audience` with a PEM-encoded EC (P-256) private key.
    pub fn sign(
        audience: &str,
        private_key_pem: &[u8],
        lifetime: Duration,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        let issued_at = Utc::now();
        let expires_at = issued_at + chrono::Duration::seconds(lifetime.as_secs() as i64);

        let claims = Claims {
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            aud: audience.to_string(),
        };
        let key = EncodingKey::from_ec_pem(private_key_pem)?;
        let jwt = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &key)?;

        Ok(Self {
            jwt,
            issued_at,
            expires_at,
            audience: audience.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.jwt
    }
}

impl fmt::Debug for RenewalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenewalToken")
            .field("jwt", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("audience", &self.audience)
            .finish()
    }
}
