//! Transport selection for rumqttc.
//!
//! Cloud backends use TLS with in-memory PEM material (decoded from the
//! device environment); the local broker is plaintext.

use rumqttc::{TlsConfiguration, Transport};

use crate::config::MqttSettings;
use crate::error::{MqttError, MqttResult};

const PEM_MARKER: &[u8] = b"-----BEGIN";

/// Build the transport for `settings`, validating any TLS material first.
///
/// rumqttc only reports bad PEM once the handshake starts; checking here
/// gives a clear error naming the offending item.
pub fn transport(settings: &MqttSettings) -> MqttResult<Transport> {
    let Some(tls) = &settings.tls else {
        return Ok(plaintext_transport());
    };

    ensure_pem("CA certificate", &tls.ca)?;
    if let Some((cert, key)) = &tls.client_auth {
        ensure_pem("client certificate", cert)?;
        ensure_pem("client private key", key)?;
    }

    Ok(Transport::tls_with_config(TlsConfiguration::Simple {
        ca: tls.ca.clone(),
        alpn: None,
        client_auth: tls.client_auth.clone(),
    }))
}

/// Plain TCP transport (local broker).
pub fn plaintext_transport() -> Transport {
    Transport::Tcp
}

fn ensure_pem(what: &str, bytes: &[u8]) -> MqttResult<()> {
    if bytes.is_empty() {
        return Err(MqttError::Tls(format!("{what} is empty")));
    }
    if !bytes.windows(PEM_MARKER.len()).any(|w| w == PEM_MARKER) {
        return Err(MqttError::Tls(format!("{what} is not PEM encoded")));
    }
    Ok(())
}
