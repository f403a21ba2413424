//! E2E tests for the registration state machine:
//! unregistered → provisioning service, partial → wait, already exists → refresh.

mod helpers;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cr_protocol::Provider;
use cr_protocol::credentials::{GCP_PROJECT_ID, GCP_REGION};
use cr_relay_agent::config::{PROVISION_URL, SERVICE_NAME};
use cr_relay_agent::error::RelayError;
use cr_relay_agent::provision::{ProvisionError, ProvisionOutcome};
use cr_relay_agent::relay::CycleOutcome;

use helpers::{Env, TestHarness, UUID};

fn provision_url(server: &MockServer) -> String {
    format!("{}/api/provision", server.uri())
}

/// Unregistered device + 201 from the service → provisioned, no connections.
#[tokio::test]
async fn e2e_unregistered_device_is_provisioned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/provision"))
        .and(header("cache-control", "no-cache"))
        .and(body_json(json!({ "uuid": UUID })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let config = Env::new(Provider::Aws)
        .set(PROVISION_URL, &provision_url(&server))
        .config();
    let mut h = TestHarness::new(config);

    let outcome = h.orchestrator.run_cycle().await.unwrap();
    let CycleOutcome::Provisioning(outcome) = outcome else {
        panic!("expected provisioning");
    };
    assert_eq!(outcome, ProvisionOutcome::Provisioned);
    assert!(outcome.succeeded());

    assert_eq!(h.refresher.calls(), 0);
    assert_eq!(h.local.attempts(), 0);
    assert_eq!(h.cloud.attempts(), 0);
}

/// Partial credentials → no provisioning call and no connection attempts.
#[tokio::test]
async fn e2e_partial_registration_makes_no_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let config = Env::new(Provider::Gcp)
        .set(PROVISION_URL, &provision_url(&server))
        .set(GCP_PROJECT_ID, "e2e-project")
        .set(GCP_REGION, "us-central1")
        .config();
    let mut h = TestHarness::new(config);

    let outcome = h.orchestrator.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::AwaitingCredentials));
    assert_eq!(h.local.attempts(), 0);
    assert_eq!(h.cloud.attempts(), 0);
    assert_eq!(h.refresher.calls(), 0);
}

/// Each provider's "already exists" reply → not a success, one refresh.
#[tokio::test]
async fn e2e_already_registered_refreshes_environment() {
    let cases = [
        (Provider::Aws, 400, "thing already exists".to_string()),
        (Provider::Azure, 409, "DeviceAlreadyExistsError: e2e0device".to_string()),
        (Provider::Gcp, 409, json!({ "code": 6, "message": "exists" }).to_string()),
    ];

    for (provider, status, body) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/provision"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let config = Env::new(provider)
            .set(PROVISION_URL, &provision_url(&server))
            .set(SERVICE_NAME, "cloud-relay")
            .config();
        let mut h = TestHarness::new(config);

        let outcome = h.orchestrator.run_cycle().await.unwrap();
        assert!(
            matches!(
                outcome,
                CycleOutcome::Provisioning(ProvisionOutcome::AlreadyRegistered)
            ),
            "{provider}"
        );
        assert_eq!(h.refresher.calls(), 1, "{provider}");
        assert_eq!(h.cloud.attempts(), 0);
    }
}

/// A generic server error → cycle error, refresh never called.
#[tokio::test]
async fn e2e_provisioning_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let config = Env::new(Provider::Azure)
        .set(PROVISION_URL, &provision_url(&server))
        .config();
    let mut h = TestHarness::new(config);

    let err = h.orchestrator.run_cycle().await.unwrap_err();
    assert!(matches!(
        err,
        RelayError::Provision(ProvisionError::Rejected { .. })
    ));
    assert!(err.to_string().contains("upstream unavailable"));
    assert_eq!(h.refresher.calls(), 0);
}

/// No provisioning endpoint configured → configuration error, nothing sent.
#[tokio::test]
async fn e2e_missing_provision_url() {
    let mut h = TestHarness::new(Env::new(Provider::Aws).config());

    let err = h.orchestrator.run_cycle().await.unwrap_err();
    assert!(matches!(err, RelayError::Provision(ProvisionError::Config(_))));
    assert!(err.to_string().contains(PROVISION_URL));
}
