//! Envelope metadata wrapper shared by every payload kind.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed schema tag carried by every envelope. Bump only on a breaking wire
/// change; readers reject anything else.
pub const SCHEMA_VERSION: &str = "v1.0.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub id: Uuid,
    /// Unix seconds.
    pub timestamp: i64,
    pub source: Source,
    pub schema_version: String,
    #[serde(rename = "type")]
    pub kind: Kind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub service: String,
    pub instance: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    CommandRequest,
    CommandResponse,
    Heartbeat,
    EmergencyStop,
    OtaRequest,
}

impl Kind {
    /// Whether this kind requires a correlation id on the envelope.
    pub fn requires_correlation_id(self) -> bool {
        matches!(
            self,
            Kind::CommandRequest | Kind::CommandResponse | Kind::OtaRequest
        )
    }

    /// Whether this kind requires a reply-to channel on the envelope.
    pub fn requires_reply_to(self) -> bool {
        matches!(self, Kind::CommandRequest | Kind::OtaRequest)
    }
}
