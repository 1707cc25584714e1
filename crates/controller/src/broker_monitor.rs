//! Periodic broker liveness probe with backoff and up/down transition
//! callbacks. Grounded on `zmq/manager.rs`'s connection-state tracking
//! (`ConnectionState` enum, `connect()`/`is_connected()` shape), replacing
//! the chaosgarden ZMQ handshake with a broker `ping`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stationbus_proto::BackoffConfig;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::Broker;

pub type EdgeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BrokerStatus {
    pub connected: bool,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub transitions: u64,
}

struct Inner {
    last_error: RwLock<Option<String>>,
    last_latency_ms: AtomicU64,
    connected: AtomicBool,
    transitions: AtomicU64,
}

pub struct BrokerMonitor {
    broker: Arc<dyn Broker>,
    probe_interval: Duration,
    probe_timeout: Duration,
    backoff: BackoffConfig,
    inner: Inner,
    on_down: RwLock<Option<EdgeCallback>>,
    on_up: RwLock<Option<EdgeCallback>>,
}

impl BrokerMonitor {
    pub fn new(broker: Arc<dyn Broker>, probe_interval: Duration) -> Self {
        Self::new_with_backoff(broker, probe_interval, BackoffConfig::default())
    }

    pub fn new_with_backoff(
        broker: Arc<dyn Broker>,
        probe_interval: Duration,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            broker,
            probe_interval,
            probe_timeout: Duration::from_secs(3),
            backoff,
            inner: Inner {
                last_error: RwLock::new(None),
                last_latency_ms: AtomicU64::new(0),
                connected: AtomicBool::new(false),
                transitions: AtomicU64::new(0),
            },
            on_down: RwLock::new(None),
            on_up: RwLock::new(None),
        }
    }

    pub async fn set_on_down(&self, cb: EdgeCallback) {
        *self.on_down.write().await = Some(cb);
    }

    pub async fn set_on_up(&self, cb: EdgeCallback) {
        *self.on_up.write().await = Some(cb);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> BrokerStatus {
        BrokerStatus {
            connected: self.is_connected(),
            last_error: self.inner.last_error.read().await.clone(),
            last_latency_ms: {
                let v = self.inner.last_latency_ms.load(Ordering::SeqCst);
                (v > 0).then_some(v)
            },
            transitions: self.inner.transitions.load(Ordering::SeqCst),
        }
    }

    /// Drive the monitor until `cancel` fires. Intended to be spawned as
    /// its own task.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_cycle().await;
                }
                _ = cancel.cancelled() => {
                    info!("broker health monitor shutting down");
                    break;
                }
            }
        }
    }

    async fn probe_once(&self) -> Result<Duration, String> {
        self.broker
            .ping(self.probe_timeout)
            .await
            .map_err(|e| e.to_string())
    }

    /// Force the connected flag without a real probe, for HTTP-layer
    /// tests that need a broker state baked in without driving the
    /// monitor's own probe loop.
    pub async fn mark_up_for_test(&self) {
        self.mark_up(Duration::from_millis(1)).await;
    }

    pub async fn mark_down_for_test(&self) {
        self.mark_down("forced down for test".to_string()).await;
    }

    async fn mark_up(&self, latency: Duration) {
        self.inner
            .last_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
        let was_down = !self.inner.connected.swap(true, Ordering::SeqCst);
        *self.inner.last_error.write().await = None;
        if was_down {
            self.inner.transitions.fetch_add(1, Ordering::SeqCst);
            info!("broker connectivity restored");
            if let Some(cb) = self.on_up.read().await.as_ref() {
                cb();
            }
        }
    }

    async fn mark_down(&self, error: String) {
        *self.inner.last_error.write().await = Some(error.clone());
        let was_up = self.inner.connected.swap(false, Ordering::SeqCst);
        if was_up {
            self.inner.transitions.fetch_add(1, Ordering::SeqCst);
            warn!(error = %error, "broker connectivity lost");
            if let Some(cb) = self.on_down.read().await.as_ref() {
                cb();
            }
        }
    }

    /// One probe cycle: on failure, retries with capped exponential
    /// backoff up to `max_attempts` before giving up until the next tick.
    async fn probe_cycle(&self) {
        match self.probe_once().await {
            Ok(latency) => {
                self.mark_up(latency).await;
                return;
            }
            Err(e) => self.mark_down(e).await,
        }

        for attempt in 1..=self.backoff.max_attempts {
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            match self.probe_once().await {
                Ok(latency) => {
                    self.mark_up(latency).await;
                    return;
                }
                Err(e) => {
                    *self.inner.last_error.write().await = Some(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn down_then_up_fires_each_callback_exactly_once() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_down(true);
        let fast_backoff = BackoffConfig {
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
            max_attempts: 1,
        };
        let monitor = Arc::new(BrokerMonitor::new_with_backoff(
            broker.clone(),
            Duration::from_millis(50),
            fast_backoff,
        ));

        let downs = Arc::new(AtomicUsize::new(0));
        let ups = Arc::new(AtomicUsize::new(0));
        let downs_clone = downs.clone();
        let ups_clone = ups.clone();
        monitor.set_on_down(Arc::new(move || { downs_clone.fetch_add(1, Ordering::SeqCst); })).await;
        monitor.set_on_up(Arc::new(move || { ups_clone.fetch_add(1, Ordering::SeqCst); })).await;

        monitor.probe_cycle().await;
        assert!(!monitor.is_connected());
        assert_eq!(downs.load(Ordering::SeqCst), 1);

        monitor.probe_cycle().await;
        assert_eq!(downs.load(Ordering::SeqCst), 1, "repeated failure must not refire on_down");

        broker.set_down(false);
        monitor.probe_cycle().await;
        assert!(monitor.is_connected());
        assert_eq!(ups.load(Ordering::SeqCst), 1);
    }
}
