//! Cloud relay agent: bridges the device's local MQTT bus to AWS IoT Core,
//! Google Cloud IoT Core or Azure IoT Hub.
//!
//! Runs one cycle per process start. Provisioning, missing credentials and
//! an unreachable local broker all end the process cleanly; the container
//! restart policy brings it back once the environment has changed. Only a
//! failed GCP connection renewal exits non-zero.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use cr_mqtt_channel::RumqttConnector;
use cr_relay_agent::config::RelayConfig;
use cr_relay_agent::error::RelayError;
use cr_relay_agent::exit;
use cr_relay_agent::relay::{CycleOutcome, Orchestrator, RelayExit};
use cr_relay_agent::supervisor::SupervisorClient;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "cr-relay-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(exit::for_error(&RelayError::from(e)));
        }
    };
    tracing::info!(
        uuid = %config.device.uuid,
        provider = %config.device.provider,
        producer = %config.topics.producer,
        "config loaded"
    );

    // ── Wire collaborators ──────────────────────────────────────
    let refresher = Arc::new(SupervisorClient::new(
        config.supervisor.clone(),
        config.provision_timeout,
    ));
    let mut orchestrator = Orchestrator::new(
        config,
        Arc::new(RumqttConnector),
        Arc::new(RumqttConnector),
        refresher,
    );

    // ── Run one cycle ───────────────────────────────────────────
    let result = orchestrator.run_cycle().await;
    match &result {
        Ok(CycleOutcome::Provisioning(outcome)) => {
            tracing::info!(?outcome, "provisioning finished");
        }
        Ok(CycleOutcome::AwaitingCredentials) => {
            tracing::info!("credentials incomplete, nothing to relay");
        }
        Ok(CycleOutcome::LocalUnavailable) => {
            tracing::info!("local broker unavailable, nothing to relay");
        }
        Ok(CycleOutcome::Relaying(_)) => {}
        Err(e) => {
            tracing::error!(error = %e, "relay cycle failed");
        }
    }
    if let Some(status) = exit::for_cycle(&result) {
        return ExitCode::from(status);
    }
    let Ok(CycleOutcome::Relaying(handle)) = result else {
        return ExitCode::SUCCESS;
    };

    tracing::info!(topic = %handle.cloud_topic(), "cr-relay-agent ready");

    let status = tokio::select! {
        relay_exit = handle.wait() => {
            match &relay_exit {
                RelayExit::LocalClosed => tracing::warn!("local broker stream ended"),
                RelayExit::RenewalExhausted(e) => {
                    tracing::error!(error = %e, "cloud connection lost");
                }
            }
            exit::for_relay(&relay_exit)
        }
        // Graceful shutdown on SIGINT
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            exit::SUCCESS
        }
    };

    orchestrator.messenger().disconnect().await;
    tracing::info!("cr-relay-agent stopped");
    ExitCode::from(status)
}
