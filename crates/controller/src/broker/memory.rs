//! In-memory `Broker` test double. Channels are `tokio::sync::broadcast`
//! senders keyed by name; presence keys are a map of value + deadline
//! checked lazily on scan, mirroring Redis's own lazy-expiry behavior
//! closely enough for tests that assert on `scan_prefix`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::{Broker, BrokerError, ByteStream};

struct PresenceEntry {
    value: String,
    deadline: Instant,
}

#[derive(Default)]
pub struct InMemoryBroker {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
    presence: DashMap<String, PresenceEntry>,
    pinging: std::sync::atomic::AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make the next `ping` fail, simulating a broker outage.
    pub fn set_down(&self, down: bool) {
        self.pinging.store(!down, std::sync::atomic::Ordering::SeqCst);
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        // A publish with no subscribers is not an error; it's just a
        // dropped broadcast, same as Redis pub/sub with no listeners.
        let _ = self.sender_for(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<ByteStream, BrokerError> {
        let rx = self.sender_for(channel).subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|item| item.ok());
        Ok(Box::pin(stream))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError> {
        self.presence.insert(
            key.to_string(),
            PresenceEntry {
                value: value.to_string(),
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Duration)>, BrokerError> {
        let now = Instant::now();
        Ok(self
            .presence
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && entry.value().deadline > now)
            .map(|entry| (entry.key().clone(), entry.value().deadline - now))
            .collect())
    }

    async fn ping(&self, _timeout: Duration) -> Result<Duration, BrokerError> {
        if self.pinging.load(std::sync::atomic::Ordering::SeqCst) {
            Ok(Duration::from_millis(1))
        } else {
            Err(BrokerError::Ping("broker down (test double)".to_string()))
        }
    }
}

impl InMemoryBroker {
    /// Presence values are unused by production logic (only key
    /// existence matters) but kept for debugging/test assertions.
    #[cfg(test)]
    pub fn presence_value(&self, key: &str) -> Option<String> {
        self.presence.get(key).map(|e| e.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_subscribe_receives() {
        let broker = InMemoryBroker::new();
        broker.set_down(false);
        let mut stream = broker.subscribe("events:heartbeat").await.unwrap();
        broker
            .publish("events:heartbeat", b"hello".to_vec())
            .await
            .unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, b"hello".to_vec());
    }

    #[tokio::test]
    async fn scan_prefix_respects_ttl() {
        let broker = InMemoryBroker::new();
        broker
            .set_with_ttl("device:station-01:alive", "1", Duration::from_millis(20))
            .await
            .unwrap();
        let keys = broker.scan_prefix("device:").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, "device:station-01:alive");
        assert!(keys[0].1 <= Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let keys = broker.scan_prefix("device:").await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn ping_reflects_down_flag() {
        let broker = InMemoryBroker::new();
        broker.set_down(true);
        assert!(broker.ping(Duration::from_secs(1)).await.is_err());
        broker.set_down(false);
        assert!(broker.ping(Duration::from_secs(1)).await.is_ok());
    }
}
