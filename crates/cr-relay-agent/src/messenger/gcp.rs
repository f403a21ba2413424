//! Google Cloud IoT Core: JWT-authenticated MQTT with periodic renewal.
//!
//! The bridge drops a session when its token expires. After every
//! successful connect a renewal task waits `lifetime - margin`, closes the
//! connection, and reconnects with a freshly signed token under the retry
//! policy. Publishes during the swap are dropped.

use std::sync::Arc;

use cr_mqtt_channel::config::TLS_PORT;
use cr_mqtt_channel::{MqttSettings, TlsMaterial};
use cr_protocol::credentials::{
    GCP_PRIVATE_KEY, GCP_PROJECT_ID, GCP_REGION, GCP_REGISTRY_ID, GCP_ROOT_CERT,
};
use cr_protocol::topics::{
    GCP_MQTT_HOST, gcp_client_path, gcp_default_topic, gcp_device_id, gcp_finalize_topic,
};
use tokio::sync::RwLock;

use super::token::{RenewalToken, TokenPolicy};
use super::{MessengerCore, MessengerError, MessengerResult, RenewalHandle};
use crate::retry::RetryPolicy;

/// The bridge ignores the username but MQTT requires one with a password.
const GCP_USERNAME: &str = "unused";

#[derive(Clone)]
pub struct GcpMessenger {
    core: MessengerCore,
    policy: TokenPolicy,
    retry: RetryPolicy,
    token: Arc<RwLock<Option<RenewalToken>>>,
}

impl GcpMessenger {
    pub(crate) fn new(core: MessengerCore, policy: TokenPolicy, retry: RetryPolicy) -> Self {
        Self {
            core,
            policy,
            retry,
            token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn core(&self) -> &MessengerCore {
        &self.core
    }

    pub fn device_id(&self) -> String {
        gcp_device_id(&self.core.device.uuid)
    }

    pub fn default_consumer_topic(&self) -> String {
        gcp_default_topic(&self.device_id())
    }

    pub fn finalize_consumer_topic(&self, topic: &str) -> String {
        gcp_finalize_topic(&self.device_id(), topic)
    }

    /// Token the current connection was opened with.
    pub async fn current_token(&self) -> Option<RenewalToken> {
        self.token.read().await.clone()
    }

    /// Sign a token valid for the configured lifetime.
    pub fn sign_token(&self) -> MessengerResult<RenewalToken> {
        let creds = &self.core.credentials;
        let project = creds.require(GCP_PROJECT_ID)?;
        let key = creds.decode(GCP_PRIVATE_KEY)?;
        Ok(RenewalToken::sign(project, &key, self.policy.lifetime)?)
    }

    pub fn settings(&self, token: &RenewalToken) -> MessengerResult<MqttSettings> {
        let creds = &self.core.credentials;
        let client_id = gcp_client_path(
            creds.require(GCP_PROJECT_ID)?,
            creds.require(GCP_REGION)?,
            creds.require(GCP_REGISTRY_ID)?,
            &self.device_id(),
        );
        let tls = TlsMaterial {
            ca: creds.decode(GCP_ROOT_CERT)?,
            client_auth: None,
        };
        Ok(MqttSettings::new(GCP_MQTT_HOST, TLS_PORT, client_id)
            .with_credentials(GCP_USERNAME, token.as_str())
            .with_tls(tls))
    }

    /// Sign a fresh token and open a connection with it.
    async fn establish(&self) -> MessengerResult<()> {
        let token = self.sign_token()?;
        let settings = self.settings(&token)?;
        self.core.open(&settings).await?;
        tracing::debug!(expires_at = %token.expires_at, "GCP token installed");
        *self.token.write().await = Some(token);
        Ok(())
    }

    /// Connect and start the renewal task.
    pub async fn connect(&self) -> MessengerResult<RenewalHandle> {
        self.establish().await?;
        let messenger = self.clone();
        Ok(RenewalHandle::spawn(messenger.renew_forever()))
    }

    async fn renew_forever(self) -> MessengerError {
        loop {
            let delay = self.policy.renewal_delay();
            tracing::info!(renew_in_secs = delay.as_secs(), "GCP connection renewal scheduled");
            tokio::time::sleep(delay).await;

            if let Err(e) = self.renew().await {
                tracing::error!(error = %e, "GCP connection renewal failed");
                return e;
            }
        }
    }

    /// Close the current connection and reconnect with a new token.
    pub async fn renew(&self) -> MessengerResult<()> {
        tracing::info!(device = %self.device_id(), "renewing GCP connection");
        self.core.link.close().await;

        self.retry
            .run("gcp reconnect", || self.establish())
            .await
            .map_err(|e| MessengerError::RenewalExhausted {
                attempts: self.retry.attempts.max(1),
                source: Box::new(e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GCP_TOKEN_LIFETIME, GCP_TOKEN_RENEWAL_MARGIN};
    use crate::messenger::{CloudMessenger, Delivery};
    use crate::testing::{CERT_PEM, registered_config};
    use cr_mqtt_channel::{Channel, MockConnector};
    use cr_protocol::Provider;
    use std::time::Duration;
    use tokio::time::Instant;

    fn gcp(connector: Arc<MockConnector>, extra: &[(&str, &str)]) -> GcpMessenger {
        let config = registered_config(Provider::Gcp, extra);
        match CloudMessenger::select(&config, connector) {
            CloudMessenger::Gcp(m) => m,
            _ => panic!("expected GCP messenger"),
        }
    }

    /// Lifetime 2 minutes, margin 1: renewal every 60 seconds.
    const SHORT_TOKEN: &[(&str, &str)] = &[(GCP_TOKEN_LIFETIME, "2"), (GCP_TOKEN_RENEWAL_MARGIN, "1")];

    #[tokio::test]
    async fn settings_follow_bridge_conventions() {
        let m = gcp(Arc::new(MockConnector::new()), &[]);
        let token = m.sign_token().unwrap();
        let settings = m.settings(&token).unwrap();

        assert_eq!(settings.host, "mqtt.googleapis.com");
        assert_eq!(settings.port, 8883);
        assert_eq!(
            settings.client_id,
            "projects/my-project/locations/europe-west1/registries/relays/devices/balena-abc123"
        );
        assert_eq!(settings.username(), Some("unused"));
        assert_eq!(settings.password(), Some(token.as_str()));

        let tls = settings.tls.unwrap();
        assert_eq!(tls.ca, CERT_PEM.as_bytes());
        assert!(tls.client_auth.is_none());
    }

    #[tokio::test]
    async fn token_audience_is_project() {
        let m = gcp(Arc::new(MockConnector::new()), &[]);
        let token = m.sign_token().unwrap();
        assert_eq!(token.audience, "my-project");
        assert_eq!(token.expires_at - token.issued_at, chrono::Duration::minutes(60));
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_fires_at_lifetime_minus_margin() {
        let connector = Arc::new(MockConnector::new());
        let m = gcp(connector.clone(), SHORT_TOKEN);

        let handle = m.connect().await.unwrap();
        assert_eq!(connector.attempts(), 1);
        let first = m.current_token().await.unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(connector.attempts(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(connector.channels()[0].disconnects(), 1);
        assert!(connector.channels()[1].is_connected());
        assert!(m.core().link().is_connected().await);

        let second = m.current_token().await.unwrap();
        assert!(second.issued_at >= first.issued_at);
        assert!(!handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_renewal_rearms() {
        let connector = Arc::new(MockConnector::new());
        let m = gcp(connector.clone(), SHORT_TOKEN);

        let _handle = m.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60 * 3 + 1)).await;

        assert_eq!(connector.attempts(), 4);
        assert_eq!(connector.channels().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_retries_then_recovers() {
        let connector = Arc::new(MockConnector::new());
        let m = gcp(connector.clone(), SHORT_TOKEN);

        let handle = m.connect().await.unwrap();
        connector.fail_next(2);

        // 60s until renewal, then two failures 5s apart before the third try.
        tokio::time::sleep(Duration::from_secs(60 + 10 + 1)).await;
        assert_eq!(connector.attempts(), 4);
        assert_eq!(connector.channels().len(), 2);
        assert!(!handle.is_finished());
        assert!(m.core().link().is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_exhaustion_ends_the_task() {
        let connector = Arc::new(MockConnector::new());
        let m = gcp(connector.clone(), SHORT_TOKEN);

        let mut handle = m.connect().await.unwrap();
        connector.set_failing(true);
        let start = Instant::now();

        let err = handle.exhausted().await;
        assert!(matches!(err, MessengerError::RenewalExhausted { attempts: 3, .. }), "{err}");
        assert_eq!(start.elapsed(), Duration::from_secs(60 + 10));
        assert_eq!(connector.attempts(), 1 + 3);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_during_renewal_gap_are_dropped() {
        let connector = Arc::new(MockConnector::new());
        let m = gcp(connector.clone(), SHORT_TOKEN);
        let messenger = CloudMessenger::Gcp(m.clone());
        let topic = messenger.create_consumer_topic();

        let _handle = m.connect().await.unwrap();
        assert_eq!(messenger.publish(&topic, b"1").await, Delivery::Sent);

        connector.set_failing(true);
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(messenger.publish(&topic, b"2").await, Delivery::Dropped);

        let first = &connector.channels()[0];
        assert_eq!(first.published().len(), 1);
        assert_eq!(first.published()[0].topic, "/devices/balena-abc123/events");
    }

    #[tokio::test]
    async fn bad_private_key_fails_connect() {
        let connector = Arc::new(MockConnector::new());
        let config = registered_config(Provider::Gcp, &[(GCP_PRIVATE_KEY, "bm90IGEga2V5")]);
        let m = CloudMessenger::select(&config, connector.clone());

        assert!(matches!(m.connect().await, Err(MessengerError::Token(_))));
        assert_eq!(connector.attempts(), 0);
    }
}
