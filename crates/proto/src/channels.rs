//! Broker channel and key naming, per the external interface contract.

/// `commands:{station}` — controller to station, stream.
pub fn command_channel(station: &str) -> String {
    format!("commands:{station}")
}

/// `responses:{controller-instance}` — station to controller, stream.
pub fn response_channel(controller_instance: &str) -> String {
    format!("responses:{controller_instance}")
}

/// `events:heartbeat` — station to controller, pub/sub.
pub fn events_heartbeat() -> &'static str {
    "events:heartbeat"
}

/// `events:emergency_stop` — any to all, pub/sub.
pub fn events_emergency_stop() -> &'static str {
    "events:emergency_stop"
}

/// `device:{instance}:alive` — presence key with a 90s TTL, refreshed on
/// each heartbeat.
pub fn presence_key(instance: &str) -> String {
    format!("device:{instance}:alive")
}

/// Fixed TTL presence keys are set with, in seconds. Read back by the
/// presence probe to turn a key's remaining TTL into an age.
pub const PRESENCE_KEY_TTL_SECS: i64 = 90;

/// Recovers the station instance from a presence key, the inverse of
/// `presence_key`. Returns `None` for keys that don't match the shape
/// (the scan prefix is a plain string match, not a strict pattern).
pub fn instance_from_presence_key(key: &str) -> Option<&str> {
    key.strip_prefix("device:")?.strip_suffix(":alive")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_match_contract() {
        assert_eq!(command_channel("station-01"), "commands:station-01");
        assert_eq!(response_channel("ctrl-01"), "responses:ctrl-01");
        assert_eq!(events_heartbeat(), "events:heartbeat");
        assert_eq!(events_emergency_stop(), "events:emergency_stop");
        assert_eq!(presence_key("station-01"), "device:station-01:alive");
    }

    #[test]
    fn presence_key_round_trips() {
        let key = presence_key("station-07");
        assert_eq!(instance_from_presence_key(&key), Some("station-07"));
        assert_eq!(instance_from_presence_key("garbage"), None);
    }
}
