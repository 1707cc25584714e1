//! The five kind-specific payload shapes carried by a [`crate::Message`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    Heartbeat(StationHeartbeat),
    CommandRequest(CommandRequest),
    CommandResponse(CommandResponse),
    EmergencyStop(EmergencyStopReason),
    Ota(OtaRequest),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Starting,
    Running,
    Degraded,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationHeartbeat {
    pub status: HeartbeatStatus,
    pub uptime_seconds: u64,
    pub devices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_heap: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wifi_rssi: Option<i32>,
    pub firmware_version: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub counters: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRequest {
    pub device_id: String,
    pub command_name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub device_id: String,
    pub command_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyStopCause {
    ButtonPress,
    OperatorCommand,
    SafetyInterlock,
    DeviceFault,
    SoftwareError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmergencyStopReason {
    pub reason: EmergencyStopCause,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtaRequest {
    pub firmware_url: String,
    pub version: String,
    /// 64 lowercase hex characters.
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

/// Deserialize a payload whose shape is picked by the envelope's `kind`,
/// rather than by guessing from the JSON structure. This is the
/// authoritative parse path used by [`crate::Message::parse`]; the
/// `#[serde(untagged)]` derive above is convenient for tests and direct
/// construction but does not drive wire parsing.
pub fn from_value(kind: crate::Kind, value: serde_json::Value) -> Result<Payload, serde_json::Error> {
    use crate::Kind;
    match kind {
        Kind::Heartbeat => Ok(Payload::Heartbeat(serde_json::from_value(value)?)),
        Kind::CommandRequest => Ok(Payload::CommandRequest(serde_json::from_value(value)?)),
        Kind::CommandResponse => Ok(Payload::CommandResponse(serde_json::from_value(value)?)),
        Kind::EmergencyStop => Ok(Payload::EmergencyStop(serde_json::from_value(value)?)),
        Kind::OtaRequest => Ok(Payload::Ota(serde_json::from_value(value)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_response_roundtrip() {
        let p = Payload::CommandResponse(CommandResponse {
            device_id: "fluke-8846a".to_string(),
            command_name: "measure_dc_voltage".to_string(),
            success: true,
            response: Some(serde_json::json!("1.234")),
            error: None,
            duration_ms: Some(150),
        });
        let json = serde_json::to_string(&p).unwrap();
        let parsed: Payload = serde_json::from_str(&json).unwrap();
        assert_eq!(p, parsed);
    }

    #[test]
    fn heartbeat_defaults_counters() {
        let json = r#"{"status":"running","uptime_seconds":5,"devices":[],"firmware_version":"1.0.0"}"#;
        let parsed: Payload = serde_json::from_str(json).unwrap();
        match parsed {
            Payload::Heartbeat(h) => assert!(h.counters.is_empty()),
            other => panic!("expected heartbeat, got {other:?}"),
        }
    }
}
