//! Topic and client-identifier rules for each cloud backend.
//!
//! ```text
//! local   {producer}                                  (default "sensors")
//! aws     {consumer}                                  (default "sensors")
//! azure   devices/{uuid}/messages/events/
//! gcp     /devices/balena-{uuid}/events[/{subfolder}]
//! ```

/// Topic the relay subscribes to on the local broker when none is configured.
pub const DEFAULT_PRODUCER_TOPIC: &str = "sensors";

/// Default AWS IoT publish topic.
pub const AWS_DEFAULT_TOPIC: &str = "sensors";

/// Google Cloud IoT Core MQTT bridge.
pub const GCP_MQTT_HOST: &str = "mqtt.googleapis.com";

/// Azure IoT Hub MQTT API version sent in the username.
pub const AZURE_API_VERSION: &str = "2021-04-12";

// ─── Azure ───

pub fn azure_default_topic(uuid: &str) -> String {
    format!("devices/{uuid}/messages/events/")
}

pub fn azure_username(hub_host: &str, uuid: &str) -> String {
    format!("{hub_host}/{uuid}/?api-version={AZURE_API_VERSION}")
}

// ─── GCP ───

/// Cloud IoT device ids must start with a letter; balena UUIDs may not.
pub fn gcp_device_id(uuid: &str) -> String {
    format!("balena-{uuid}")
}

/// Fully qualified client id the GCP MQTT bridge expects.
pub fn gcp_client_path(project: &str, region: &str, registry: &str, device_id: &str) -> String {
    format!("projects/{project}/locations/{region}/registries/{registry}/devices/{device_id}")
}

pub fn gcp_default_topic(device_id: &str) -> String {
    format!("/devices/{device_id}/events")
}

/// Absolute topics pass through; anything else becomes a telemetry subfolder.
pub fn gcp_finalize_topic(device_id: &str, topic: &str) -> String {
    if topic.starts_with('/') {
        topic.to_string()
    } else {
        format!("{}/{}", gcp_default_topic(device_id), topic)
    }
}
