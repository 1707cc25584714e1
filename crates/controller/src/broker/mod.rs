//! Pluggable broker transport. Redis in production; an in-memory double
//! backs unit/integration tests the way the teacher hand-rolls test
//! doubles for its connection managers.

pub mod memory;
pub mod redis_broker;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

pub use memory::InMemoryBroker;
pub use redis_broker::RedisBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker publish failed: {0}")]
    Publish(String),
    #[error("broker subscribe failed: {0}")]
    Subscribe(String),
    #[error("broker key operation failed: {0}")]
    Key(String),
    #[error("broker ping failed: {0}")]
    Ping(String),
    #[error("broker ping timed out after {0:?}")]
    PingTimeout(Duration),
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// The core's only seam onto the message bus. `subscribe` returns a
/// stream of raw payload bytes for a pub/sub channel or stream key;
/// callers (the subscriber loops) own resubscribe-on-drop.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    async fn subscribe(&self, channel: &str) -> Result<ByteStream, BrokerError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), BrokerError>;

    /// Returns keys matching `prefix*` together with each key's
    /// remaining TTL, so the presence probe can derive freshness
    /// straight from the scan without a second round trip per key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Duration)>, BrokerError>;

    /// Round-trip latency, bounded by `timeout`.
    async fn ping(&self, timeout: Duration) -> Result<Duration, BrokerError>;
}
