//! Long-lived broker consumer loops: heartbeat, e-stop, response, and a
//! periodic presence probe. Each is an outer retry loop around an inner
//! consume loop, per spec.md §4.7/§9: the inner loop exits on
//! subscription error or channel close, the outer loop sleeps 2s and
//! reconnects, and a parse failure on one message never breaks either
//! loop.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use stationbus_proto::{Kind, Message, Payload};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::dispatcher::Dispatcher;
use crate::estop::EstopCoordinator;
use crate::hub::Hub;
use crate::registry::Registry;
use crate::store::Store;
use crate::test_run::TestRunManager;

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

async fn resubscribe_guard(cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => true,
        _ = cancel.cancelled() => false,
    }
}

pub fn spawn_heartbeat_loop(
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    test_manager: Arc<TestRunManager>,
    hub: Arc<Hub>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let mut stream = match broker.subscribe(stationbus_proto::events_heartbeat()).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("heartbeat subscribe failed: {e}");
                    if !resubscribe_guard(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    next = stream.next() => {
                        match next {
                            Some(bytes) => handle_heartbeat(&bytes, &registry, &test_manager, &hub).await,
                            None => {
                                warn!("heartbeat channel closed, resubscribing");
                                break;
                            }
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }

            if !resubscribe_guard(&cancel).await {
                break;
            }
        }
        info!("heartbeat loop shutting down");
    })
}

async fn handle_heartbeat(
    bytes: &[u8],
    registry: &Registry,
    test_manager: &TestRunManager,
    hub: &Hub,
) {
    let message = match Message::parse(bytes) {
        Ok(m) => m,
        Err(e) => {
            warn!("dropping malformed heartbeat: {e}");
            return;
        }
    };
    if message.validate().is_err() || message.envelope.kind != Kind::Heartbeat {
        warn!("dropping heartbeat that failed envelope validation");
        return;
    }
    let Payload::Heartbeat(hb) = &message.payload else {
        warn!("heartbeat envelope carried non-heartbeat payload");
        return;
    };
    registry.update_from_heartbeat(&message.envelope.source.instance, hb).await;
    test_manager.notify_heartbeat(&message.envelope.source.instance).await;
    hub.broadcast_event("heartbeat", serde_json::json!({
        "station": message.envelope.source.instance,
        "devices": hb.devices,
    }))
    .await;
    debug!(station = %message.envelope.source.instance, "heartbeat applied");
}

pub fn spawn_estop_loop(
    broker: Arc<dyn Broker>,
    estop: Arc<EstopCoordinator>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let mut stream = match broker.subscribe(stationbus_proto::events_emergency_stop()).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("e-stop subscribe failed: {e}");
                    if !resubscribe_guard(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    next = stream.next() => {
                        match next {
                            Some(bytes) => handle_estop(&bytes, &estop).await,
                            None => {
                                warn!("e-stop channel closed, resubscribing");
                                break;
                            }
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }

            if !resubscribe_guard(&cancel).await {
                break;
            }
        }
        info!("e-stop loop shutting down");
    })
}

async fn handle_estop(bytes: &[u8], estop: &EstopCoordinator) {
    let message = match Message::parse(bytes) {
        Ok(m) => m,
        Err(e) => {
            warn!("dropping malformed e-stop message: {e}");
            return;
        }
    };
    if message.validate().is_err() {
        warn!("dropping e-stop message that failed envelope validation");
        return;
    }
    let Payload::EmergencyStop(payload) = &message.payload else {
        warn!("e-stop envelope carried non-estop payload");
        return;
    };
    estop.handle_message(payload).await;
}

pub fn spawn_response_loop(
    broker: Arc<dyn Broker>,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<Hub>,
    controller_instance: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let channel = stationbus_proto::response_channel(&controller_instance);
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let mut stream = match broker.subscribe(&channel).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("response subscribe failed: {e}");
                    if !resubscribe_guard(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    next = stream.next() => {
                        match next {
                            Some(bytes) => handle_response(&bytes, &dispatcher, &hub).await,
                            None => {
                                warn!("response channel closed, resubscribing");
                                break;
                            }
                        }
                    }
                    _ = cancel.cancelled() => return,
                }
            }

            if !resubscribe_guard(&cancel).await {
                break;
            }
        }
        info!("response loop shutting down");
    })
}

async fn handle_response(bytes: &[u8], dispatcher: &Dispatcher, hub: &Hub) {
    let message = match Message::parse(bytes) {
        Ok(m) => m,
        Err(e) => {
            warn!("dropping malformed response: {e}");
            return;
        }
    };
    if message.validate().is_err() {
        warn!("dropping response that failed envelope validation");
        return;
    }
    let cid = message.envelope.correlation_id;
    let payload_for_hub = serde_json::to_value(&message.payload).ok();
    if dispatcher.dispatch(message) {
        if let Some(payload) = payload_for_hub {
            hub.broadcast_event("command_response", payload).await;
        }
    } else {
        warn!(?cid, "orphan command response, no waiter registered");
    }
}

/// Scans `device:*:alive` presence keys on an interval to derive
/// `{online, stale, offline}` from each key's remaining TTL, per
/// spec.md §4.7, and reconciles the result into the registry. This
/// recovers a station whose heartbeat pub/sub message was lost while
/// its presence key (refreshed independently by the station) is still
/// live; the registry's own heartbeat-age classification remains
/// authoritative otherwise — presence can only make a station's status
/// fresher, never staler, since a missing or expired key carries no
/// information the heartbeat-age sweep doesn't already have.
pub fn spawn_presence_probe(
    broker: Arc<dyn Broker>,
    registry: Arc<Registry>,
    interval: Duration,
    store: Arc<dyn Store>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match broker.scan_prefix("device:").await {
                        Ok(keys) => {
                            let observations: Vec<(String, i64)> = keys
                                .into_iter()
                                .filter_map(|(key, remaining)| {
                                    let instance = stationbus_proto::instance_from_presence_key(&key)?;
                                    let age = (stationbus_proto::PRESENCE_KEY_TTL_SECS
                                        - remaining.as_secs() as i64)
                                        .max(0);
                                    Some((instance.to_string(), age))
                                })
                                .collect();
                            debug!(count = observations.len(), "presence probe scan");
                            let recovered = registry.reconcile_presence(&observations).await;
                            if !recovered.is_empty() {
                                info!(?recovered, "presence probe recovered station status from presence keys");
                            }
                        }
                        Err(e) => {
                            warn!("presence probe scan failed: {e}");
                            let _ = store.append_event(crate::types::EventRecord {
                                id: uuid::Uuid::new_v4().to_string(),
                                timestamp: crate::types::now_secs(),
                                kind: "presence_probe_error".to_string(),
                                station: None,
                                device: None,
                                detail: e.to_string(),
                            }).await;
                        }
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
        info!("presence probe shutting down");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::store::SledStore;
    use stationbus_proto::{HeartbeatStatus, StationHeartbeat};

    fn hb() -> StationHeartbeat {
        StationHeartbeat {
            status: HeartbeatStatus::Running,
            uptime_seconds: 1,
            devices: vec!["a".to_string()],
            free_heap: None,
            wifi_rssi: None,
            firmware_version: "1.0.0".to_string(),
            counters: Default::default(),
        }
    }

    #[tokio::test]
    async fn presence_probe_scans_and_reconciles_without_disrupting_a_fresh_station() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let registry = Arc::new(Registry::new());
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(SledStore::open(dir.path()).unwrap());

        registry.update_from_heartbeat("station-01", &hb()).await;
        broker
            .set_with_ttl(
                &stationbus_proto::presence_key("station-01"),
                "1",
                Duration::from_secs(90),
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let probe = spawn_presence_probe(
            broker.clone(),
            registry.clone(),
            Duration::from_millis(10),
            store,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        probe.await.unwrap();

        let station = registry
            .list_stations()
            .await
            .into_iter()
            .find(|s| s.instance == "station-01")
            .unwrap();
        assert_eq!(station.status, crate::types::Status::Online);
    }

    #[tokio::test]
    async fn presence_probe_ignores_keys_for_stations_with_no_heartbeat_yet() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let registry = Arc::new(Registry::new());
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(SledStore::open(dir.path()).unwrap());

        broker
            .set_with_ttl(
                &stationbus_proto::presence_key("never-heartbeated"),
                "1",
                Duration::from_secs(90),
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let probe = spawn_presence_probe(
            broker.clone(),
            registry.clone(),
            Duration::from_millis(10),
            store,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        probe.await.unwrap();

        assert!(registry.list_stations().await.is_empty());
    }
}
