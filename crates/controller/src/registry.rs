//! In-memory fleet map: stations keyed by instance id, devices keyed by
//! their globally unique id. Guarded by a single rwlock; the health
//! sweeper is the only mutator besides heartbeats.

use std::collections::HashMap;
use stationbus_proto::StationHeartbeat;

use crate::types::{now_secs, Device, Station, Status};
use tokio::sync::RwLock;
use tracing::{debug, info};

const ONLINE_THRESHOLD_SECS: i64 = 60;
const STALE_THRESHOLD_SECS: i64 = 90;

fn status_for_age(age_secs: i64) -> Status {
    if age_secs < ONLINE_THRESHOLD_SECS {
        Status::Online
    } else if age_secs < STALE_THRESHOLD_SECS {
        Status::Stale
    } else {
        Status::Offline
    }
}

#[derive(Debug, Default)]
struct Inner {
    stations: HashMap<String, Station>,
    devices: HashMap<String, Device>,
}

/// Fleet registry. Cloning the handle is cheap (it's an `Arc` internally
/// via `tokio::sync::RwLock` wrapped by the caller); the struct itself
/// owns the lock directly so callers hold it behind an `Arc<Registry>`.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotently apply a heartbeat. Ownership transfer (a device
    /// migrating stations) is handled by delete-then-insert so the
    /// invariant "exactly one station per device" always holds.
    pub async fn update_from_heartbeat(&self, instance: &str, hb: &StationHeartbeat) {
        let now = now_secs();
        let mut inner = self.inner.write().await;

        let previous_devices: Vec<String> = inner
            .stations
            .get(instance)
            .map(|s| s.devices.clone())
            .unwrap_or_default();

        let status = status_for_age(0);

        let station = Station {
            instance: instance.to_string(),
            last_heartbeat: now,
            status,
            devices: hb.devices.clone(),
            firmware_version: hb.firmware_version.clone(),
            uptime_seconds: hb.uptime_seconds,
            free_heap: hb.free_heap,
            wifi_rssi: hb.wifi_rssi,
        };
        inner.stations.insert(instance.to_string(), station);

        // Devices no longer declared by this station's heartbeat are
        // removed outright (they are not "offline", they don't exist).
        for stale in previous_devices.iter().filter(|d| !hb.devices.contains(d)) {
            inner.devices.remove(stale);
            debug!(device = %stale, station = %instance, "device removed, no longer declared");
        }

        for device_id in &hb.devices {
            // Ownership transfer: a device previously owned by a
            // different station is deleted there first.
            if let Some(existing) = inner.devices.get(device_id) {
                if existing.station != instance {
                    info!(device = %device_id, from = %existing.station, to = %instance, "device ownership transferred");
                }
            }
            inner.devices.insert(
                device_id.clone(),
                Device {
                    id: device_id.clone(),
                    station: instance.to_string(),
                    command_channel: stationbus_proto::command_channel(instance),
                    status,
                    last_seen: now,
                },
            );
        }
    }

    pub async fn lookup_device(&self, id: &str) -> Option<Device> {
        self.inner.read().await.devices.get(id).cloned()
    }

    pub async fn list_devices(&self) -> Vec<Device> {
        self.inner.read().await.devices.values().cloned().collect()
    }

    pub async fn list_stations(&self) -> Vec<Station> {
        self.inner.read().await.stations.values().cloned().collect()
    }

    /// Reconciles presence-probe-derived freshness into the registry.
    /// For each `(instance, age_secs)` observation, if the presence key's
    /// age is fresher than what the heartbeat path has recorded, the
    /// station's last-heartbeat time and status are bumped to match —
    /// this recovers a station whose heartbeat pub/sub message was
    /// dropped while its presence key (refreshed independently) is
    /// still live. Unknown instances are skipped: the registry only
    /// creates a station from an actual heartbeat payload, which the
    /// presence probe doesn't carry. Returns the instances whose status
    /// changed as a result.
    pub async fn reconcile_presence(&self, observations: &[(String, i64)]) -> Vec<String> {
        let now = now_secs();
        let mut inner = self.inner.write().await;
        let mut changed = Vec::new();

        for (instance, age_secs) in observations {
            let Some(station) = inner.stations.get_mut(instance) else {
                continue;
            };
            let heartbeat_age = now - station.last_heartbeat;
            if *age_secs < heartbeat_age {
                station.last_heartbeat = now - age_secs;
                let new_status = status_for_age(*age_secs);
                if new_status != station.status {
                    station.status = new_status;
                    changed.push(instance.clone());
                }
            }
        }

        if !changed.is_empty() {
            for device in inner.devices.values_mut() {
                if let Some(station) = inner.stations.get(&device.station) {
                    device.status = station.status;
                }
            }
        }

        changed
    }

    /// Reclassify every station's status from heartbeat age and
    /// propagate it atomically to its declared devices. Returns the set
    /// of instances that transitioned to `offline` this sweep, for the
    /// health sweeper to diff against the previous snapshot.
    pub async fn run_health_check(&self, now: i64) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let mut newly_offline = Vec::new();

        for station in inner.stations.values_mut() {
            let age = now - station.last_heartbeat;
            let new_status = status_for_age(age);
            let transitioned_to_offline =
                new_status == Status::Offline && station.status != Status::Offline;
            station.status = new_status;
            if transitioned_to_offline {
                newly_offline.push(station.instance.clone());
            }
        }

        for device in inner.devices.values_mut() {
            if let Some(station) = inner.stations.get(&device.station) {
                device.status = station.status;
            }
        }

        newly_offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationbus_proto::HeartbeatStatus;

    fn hb(devices: &[&str]) -> StationHeartbeat {
        StationHeartbeat {
            status: HeartbeatStatus::Running,
            uptime_seconds: 10,
            devices: devices.iter().map(|s| s.to_string()).collect(),
            free_heap: Some(1024),
            wifi_rssi: Some(-50),
            firmware_version: "1.0.0".to_string(),
            counters: Default::default(),
        }
    }

    #[tokio::test]
    async fn heartbeat_populates_station_and_devices() {
        let registry = Registry::new();
        registry.update_from_heartbeat("station-01", &hb(&["a", "b"])).await;

        let device_a = registry.lookup_device("a").await.unwrap();
        assert_eq!(device_a.station, "station-01");

        let mut devices: Vec<String> = registry
            .list_devices()
            .await
            .into_iter()
            .map(|d| d.id)
            .collect();
        devices.sort();
        assert_eq!(devices, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn follow_up_heartbeat_removes_and_adds_devices() {
        let registry = Registry::new();
        registry.update_from_heartbeat("station-01", &hb(&["a", "b"])).await;
        registry.update_from_heartbeat("station-01", &hb(&["b", "c"])).await;

        assert!(registry.lookup_device("a").await.is_none());
        assert!(registry.lookup_device("c").await.is_some());

        let mut devices: Vec<String> = registry
            .list_devices()
            .await
            .into_iter()
            .map(|d| d.id)
            .collect();
        devices.sort();
        assert_eq!(devices, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn sweep_classifies_by_age_and_propagates_to_devices() {
        let registry = Registry::new();
        registry.update_from_heartbeat("station-01", &hb(&["a"])).await;

        {
            let mut inner = registry.inner.write().await;
            let station = inner.stations.get_mut("station-01").unwrap();
            station.last_heartbeat -= 30;
        }
        registry.run_health_check(now_secs()).await;
        assert_eq!(
            registry.list_stations().await[0].status,
            Status::Online
        );

        {
            let mut inner = registry.inner.write().await;
            let station = inner.stations.get_mut("station-01").unwrap();
            station.last_heartbeat -= 75 - 30;
        }
        registry.run_health_check(now_secs()).await;
        assert_eq!(registry.list_stations().await[0].status, Status::Stale);
        assert_eq!(registry.lookup_device("a").await.unwrap().status, Status::Stale);

        {
            let mut inner = registry.inner.write().await;
            let station = inner.stations.get_mut("station-01").unwrap();
            station.last_heartbeat -= 120 - 75;
        }
        let newly_offline = registry.run_health_check(now_secs()).await;
        assert_eq!(registry.list_stations().await[0].status, Status::Offline);
        assert_eq!(registry.lookup_device("a").await.unwrap().status, Status::Offline);
        assert_eq!(newly_offline, vec!["station-01".to_string()]);
    }

    #[tokio::test]
    async fn presence_reconciliation_recovers_a_station_missed_heartbeats_made_stale() {
        let registry = Registry::new();
        registry.update_from_heartbeat("station-01", &hb(&["a"])).await;

        {
            let mut inner = registry.inner.write().await;
            let station = inner.stations.get_mut("station-01").unwrap();
            station.last_heartbeat -= 75;
        }
        registry.run_health_check(now_secs()).await;
        assert_eq!(registry.list_stations().await[0].status, Status::Stale);

        // The presence key says this station refreshed 5s ago, fresher
        // than the 75s-old heartbeat record.
        let changed = registry
            .reconcile_presence(&[("station-01".to_string(), 5)])
            .await;
        assert_eq!(changed, vec!["station-01".to_string()]);
        assert_eq!(registry.list_stations().await[0].status, Status::Online);
        assert_eq!(registry.lookup_device("a").await.unwrap().status, Status::Online);
    }

    #[tokio::test]
    async fn presence_reconciliation_ignores_unknown_stations() {
        let registry = Registry::new();
        let changed = registry
            .reconcile_presence(&[("ghost-station".to_string(), 0)])
            .await;
        assert!(changed.is_empty());
    }

    #[tokio::test]
    async fn presence_reconciliation_never_worsens_a_fresher_heartbeat() {
        let registry = Registry::new();
        registry.update_from_heartbeat("station-01", &hb(&["a"])).await;

        // Presence key is older than the just-applied heartbeat; must
        // not regress the station to a worse status.
        let changed = registry
            .reconcile_presence(&[("station-01".to_string(), 95)])
            .await;
        assert!(changed.is_empty());
        assert_eq!(registry.list_stations().await[0].status, Status::Online);
    }
}
