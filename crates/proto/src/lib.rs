//! Wire envelope and payload types exchanged between the controller and
//! field stations over the message broker.
//!
//! Every message on the wire is a JSON object `{envelope, payload}`. This
//! crate owns the envelope shape, the five payload kinds, validation, and
//! the broker channel naming scheme. It performs no I/O.

mod backoff;
mod channels;
mod envelope;
mod error;
mod payload;
mod validate;

pub use backoff::BackoffConfig;
pub use channels::{
    command_channel, events_emergency_stop, events_heartbeat, instance_from_presence_key,
    presence_key, response_channel, PRESENCE_KEY_TTL_SECS,
};
pub use envelope::{Envelope, Kind, Source, SCHEMA_VERSION};
pub use error::{ProtoError, ValidationError};
pub use payload::{
    from_value, CommandError, CommandRequest, CommandResponse, EmergencyStopCause,
    EmergencyStopReason, HeartbeatStatus, OtaRequest, Payload, StationHeartbeat,
};

use serde::{Deserialize, Serialize};

/// The full transport unit: envelope metadata plus its payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Message {
    pub envelope: Envelope,
    pub payload: Payload,
}

/// Wire shape used only to read the envelope before the payload's kind is
/// known; see [`Message::parse`].
#[derive(Deserialize)]
struct RawMessage {
    envelope: Envelope,
    payload: serde_json::Value,
}

impl Message {
    /// Assemble a message with a fresh id, current timestamp, and the fixed
    /// schema tag. `correlation_id` and `reply_to` are filled per the
    /// kind-conditional rules enforced by [`validate`].
    pub fn build(
        kind: Kind,
        source: Source,
        payload: Payload,
        correlation_id: Option<uuid::Uuid>,
        reply_to: Option<String>,
    ) -> Self {
        let envelope = Envelope {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now().timestamp(),
            source,
            schema_version: SCHEMA_VERSION.to_string(),
            kind,
            correlation_id,
            reply_to,
        };
        Self { envelope, payload }
    }

    /// Parse a message from raw JSON bytes off the wire. Does not validate;
    /// call [`validate`] separately so parse failures and validation
    /// failures can be counted/logged distinctly per the error taxonomy.
    ///
    /// The payload shape is picked using the envelope's `type` tag rather
    /// than guessed from the JSON structure, so two payload kinds that
    /// happen to share field names can never be confused.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtoError> {
        let raw: RawMessage =
            serde_json::from_slice(bytes).map_err(|e| ProtoError::Parse(e.to_string()))?;
        let payload = payload::from_value(raw.envelope.kind, raw.payload)
            .map_err(|e| ProtoError::Parse(e.to_string()))?;
        Ok(Self {
            envelope: raw.envelope,
            payload,
        })
    }

    /// Serialize to canonical JSON for publishing to the broker.
    pub fn to_json(&self) -> Result<Vec<u8>, ProtoError> {
        serde_json::to_vec(self).map_err(|e| ProtoError::Parse(e.to_string()))
    }

    /// Run the full validation rule set from the envelope contract.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::validate(&self.envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Source {
        Source {
            service: "controller".to_string(),
            instance: "ctrl-01".to_string(),
            version: "1.0.0".to_string(),
        }
    }

    #[test]
    fn build_then_parse_then_validate_roundtrips() {
        let msg = Message::build(
            Kind::Heartbeat,
            source(),
            Payload::Heartbeat(StationHeartbeat {
                status: HeartbeatStatus::Running,
                uptime_seconds: 120,
                devices: vec!["fluke-8846a".to_string()],
                free_heap: Some(48_000),
                wifi_rssi: Some(-61),
                firmware_version: "2.3.1".to_string(),
                counters: Default::default(),
            }),
            None,
            None,
        );
        let bytes = msg.to_json().unwrap();
        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(msg, parsed);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn parse_rejects_truncated_bytes() {
        assert!(Message::parse(b"{\"envelope\":").is_err());
        assert!(Message::parse(b"").is_err());
        assert!(Message::parse(b"\"just a string\"").is_err());
    }

    #[test]
    fn command_request_without_correlation_id_fails_validation() {
        let mut msg = Message::build(
            Kind::CommandRequest,
            source(),
            Payload::CommandRequest(CommandRequest {
                device_id: "fluke-8846a".to_string(),
                command_name: "measure_dc_voltage".to_string(),
                parameters: Default::default(),
                timeout_ms: None,
            }),
            Some(uuid::Uuid::new_v4()),
            Some("responses:ctrl-01".to_string()),
        );
        assert!(msg.validate().is_ok());
        msg.envelope.correlation_id = None;
        assert!(msg.validate().is_err());
    }
}
