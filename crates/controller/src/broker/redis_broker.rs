//! Redis-backed `Broker`. Pub/sub for events, plain `PUBLISH`/`SUBSCRIBE`
//! for the command/response streams (spec.md treats them as logical
//! streams but demultiplexing is by correlation id, not by consumer
//! group, so plain pub/sub channels satisfy the contract), `SET PX` +
//! `SCAN` for presence keys, and `PING` for the health monitor.
//!
//! Grounded on `oddurs-prime-hunter`'s `redis::aio::ConnectionManager` +
//! `PING` usage for liveness, generalized from a one-shot health check
//! into the full transport this core depends on.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use super::{Broker, BrokerError, ByteStream};

pub struct RedisBroker {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(address: &str) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(address).map_err(|e| BrokerError::Publish(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<ByteStream, BrokerError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        // Bridge redis's borrowed-stream pubsub API to an owned byte
        // stream via a forwarding task, so callers don't have to keep
        // the `PubSub` struct alive themselves.
        let (tx, rx) = tokio::sync::mpsc::channel(256);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("redis pubsub payload decode failed: {e}");
                        continue;
                    }
                };
                if tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| BrokerError::Key(e.to_string()))
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Duration)>, BrokerError> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = {
            let mut iter: redis::AsyncIter<'_, String> = conn
                .scan_match(pattern)
                .await
                .map_err(|e| BrokerError::Key(e.to_string()))?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        // TTL is fetched per key rather than pipelined: fleet size is
        // bounded (six stations), so this stays a handful of round
        // trips per probe cycle.
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let ttl: i64 = conn
                .ttl(&key)
                .await
                .map_err(|e| BrokerError::Key(e.to_string()))?;
            // -2 means the key expired between SCAN and TTL; -1 means
            // it has no expiry (shouldn't happen for a key set with
            // SET EX, but skip rather than misreport either way).
            if ttl >= 0 {
                results.push((key, Duration::from_secs(ttl as u64)));
            }
        }
        Ok(results)
    }

    async fn ping(&self, timeout: Duration) -> Result<Duration, BrokerError> {
        let mut conn = self.manager.clone();
        let started = Instant::now();
        let fut = redis::cmd("PING").query_async::<String>(&mut conn);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(_)) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(BrokerError::Ping(e.to_string())),
            Err(_) => Err(BrokerError::PingTimeout(timeout)),
        }
    }
}
