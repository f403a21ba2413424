use std::fmt;
use std::time::Duration;

/// Default MQTT-over-TLS port used by all three cloud backends.
pub const TLS_PORT: u16 = 8883;

/// Default plaintext MQTT port (local broker).
pub const PLAINTEXT_PORT: u16 = 1883;

/// Reconnect attempts after a live connection drops.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Pause before each reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connection parameters for one MQTT session.
#[derive(Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// Broker hostname.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client ID (unique per device and broker).
    pub client_id: String,
    /// Keep-alive interval in seconds.
    pub keepalive_secs: u16,
    /// How long to wait for CONNACK before giving up.
    pub connect_timeout_secs: u64,
    /// Username/password pair, if the broker authenticates that way.
    pub credentials: Option<(String, String)>,
    /// TLS material; `None` connects plaintext.
    pub tls: Option<TlsMaterial>,
    /// Reconnect attempts before a dropped session is given up.
    pub reconnect_attempts: u32,
    /// Pause before each reconnect attempt.
    pub reconnect_delay: Duration,
}

/// PEM-encoded TLS material held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// CA certificate bundle.
    pub ca: Vec<u8>,
    /// Client certificate and private key for mTLS.
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl MqttSettings {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keepalive_secs: 30,
            connect_timeout_secs: 30,
            credentials: None,
            tls: None,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_delay = delay;
        self
    }

    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|(u, _)| u.as_str())
    }

    pub fn password(&self) -> Option<&str> {
        self.credentials.as_ref().map(|(_, p)| p.as_str())
    }
}

// Secrets stay out of logs.
impl fmt::Debug for MqttSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("keepalive_secs", &self.keepalive_secs)
            .field("username", &self.username())
            .field("password", &self.credentials.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_bytes", &self.ca.len())
            .field("client_auth", &self.client_auth.is_some())
            .finish()
    }
}
