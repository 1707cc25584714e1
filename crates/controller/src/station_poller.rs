//! Periodic status query against every currently online station,
//! independent of heartbeats, for extra observability. Fire-and-forget:
//! no waiter is registered, so any response that does come back is
//! logged as an orphan by the response loop. Publish failures are
//! logged and otherwise ignored; this task never blocks the health
//! sweeper or the HTTP path, sharing only the registry's read path.

use std::sync::Arc;
use std::time::Duration;

use stationbus_proto::{CommandRequest, Kind, Message, Payload, Source};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command_sender::CommandSender;
use crate::registry::Registry;
use crate::types::Status;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub fn spawn(
    registry: Arc<Registry>,
    command_sender: Arc<CommandSender>,
    source: Source,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    poll_online_stations(&registry, &command_sender, &source).await;
                }
                _ = cancel.cancelled() => break,
            }
        }
        debug!("station poller shutting down");
    })
}

async fn poll_online_stations(registry: &Registry, command_sender: &CommandSender, source: &Source) {
    for station in registry.list_stations().await {
        if station.status != Status::Online {
            continue;
        }
        let channel = stationbus_proto::command_channel(&station.instance);
        let reply_to = stationbus_proto::response_channel(&source.instance);
        let message = Message::build(
            Kind::CommandRequest,
            source.clone(),
            Payload::CommandRequest(CommandRequest {
                device_id: station.instance.clone(),
                command_name: "station_status".to_string(),
                parameters: Default::default(),
                timeout_ms: None,
            }),
            Some(uuid::Uuid::new_v4()),
            Some(reply_to),
        );

        if let Err(e) = command_sender.send(&channel, &message).await {
            warn!(station = %station.instance, "station poller publish failed: {e}");
        }
    }
}
