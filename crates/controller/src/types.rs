//! Domain types shared across the registry, store, and HTTP surface.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Online/stale/offline classification derived from heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Online,
    Stale,
    Offline,
}

/// A field station, keyed by instance id. Created on first heartbeat;
/// never destroyed once seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub instance: String,
    pub last_heartbeat: i64,
    pub status: Status,
    pub devices: Vec<String>,
    pub firmware_version: String,
    pub uptime_seconds: u64,
    pub free_heap: Option<u64>,
    pub wifi_rssi: Option<i32>,
}

/// A logical instrument, keyed by a globally unique device id declared by
/// its owning station's heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub station: String,
    pub command_channel: String,
    pub status: Status,
    pub last_seen: i64,
}

/// `{active, reason, description, initiator, triggered_at}`. `active =
/// false` iff every string field is empty and `triggered_at` is zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EstopState {
    pub active: bool,
    pub reason: String,
    pub description: String,
    pub initiator: String,
    pub triggered_at: i64,
}

impl EstopState {
    pub fn cleared() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRunStatus {
    Running,
    Passed,
    Failed,
    Error,
    Aborted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: String,
    pub script: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: TestRunStatus,
    pub station: String,
    pub summary: Option<String>,
}

/// Append-only measurement row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub test_run: String,
    pub device: String,
    pub command: String,
    pub success: bool,
    pub response: Option<String>,
    pub duration_ms: Option<u64>,
    pub timestamp: i64,
}

/// Generic append-only event row for non-measurement state transitions
/// (e-stop, station offline, OTA dispatch, test-run lifecycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub timestamp: i64,
    pub kind: String,
    pub station: Option<String>,
    pub device: Option<String>,
    pub detail: String,
}

/// Current Unix-seconds timestamp.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
