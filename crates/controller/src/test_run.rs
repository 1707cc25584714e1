//! Per-station test lifecycle: starts runs, records measurements against
//! them, and interrupts any run still `running` when its station goes
//! offline (health sweeper hook) or a plant-wide e-stop fires (e-stop
//! coordinator's fan-out callback) — the third callback consumer named
//! in spec.md §9's "Callback coupling" note.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::Store;
use crate::types::{now_secs, EventRecord, Measurement, TestRun, TestRunStatus};

#[derive(Default)]
struct Inner {
    running: HashMap<String, TestRun>,
    by_station: HashMap<String, HashSet<String>>,
}

pub struct TestRunManager {
    store: Arc<dyn Store>,
    inner: RwLock<Inner>,
}

impl TestRunManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub async fn start(&self, station: &str, script: &str) -> TestRun {
        let run = TestRun {
            id: Uuid::new_v4().to_string(),
            script: script.to_string(),
            started_at: now_secs(),
            finished_at: None,
            status: TestRunStatus::Running,
            station: station.to_string(),
            summary: None,
        };

        if let Err(e) = self.store.start_test_run(run.clone()).await {
            warn!("failed to persist test run start: {e}");
        }

        let mut inner = self.inner.write().await;
        inner.by_station.entry(station.to_string()).or_default().insert(run.id.clone());
        inner.running.insert(run.id.clone(), run.clone());
        run
    }

    pub async fn record_measurement(&self, measurement: Measurement) {
        if let Err(e) = self.store.append_measurement(measurement).await {
            warn!("failed to persist measurement: {e}");
        }
    }

    pub async fn finish(&self, run_id: &str, status: TestRunStatus, summary: Option<String>) {
        if let Err(e) = self
            .store
            .finish_test_run(run_id, status, summary, now_secs())
            .await
        {
            warn!("failed to persist test run finish: {e}");
        }
        self.untrack(run_id).await;
    }

    async fn untrack(&self, run_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(run) = inner.running.remove(run_id) {
            if let Some(set) = inner.by_station.get_mut(&run.station) {
                set.remove(run_id);
            }
        }
    }

    /// Placeholder for the "test-manager notify" step in the heartbeat
    /// loop (spec.md §4.7). Running tests don't currently react to a
    /// station simply being alive; offline/e-stop are the interrupting
    /// events.
    pub async fn notify_heartbeat(&self, _station: &str) {}

    pub async fn handle_station_offline(&self, station: &str, at: i64) {
        let run_ids: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .by_station
                .get(station)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };

        for run_id in run_ids {
            self.abort_one(&run_id, "station went offline", at).await;
        }
    }

    pub async fn handle_estop(&self, at: i64) {
        let run_ids: Vec<String> = {
            let inner = self.inner.read().await;
            inner.running.keys().cloned().collect()
        };

        for run_id in run_ids {
            self.abort_one(&run_id, "emergency stop triggered", at).await;
        }
    }

    async fn abort_one(&self, run_id: &str, reason: &str, at: i64) {
        let station = {
            let inner = self.inner.read().await;
            inner.running.get(run_id).map(|r| r.station.clone())
        };

        if let Err(e) = self
            .store
            .finish_test_run(run_id, TestRunStatus::Aborted, Some(reason.to_string()), at)
            .await
        {
            warn!("failed to persist aborted test run: {e}");
        }
        let _ = self
            .store
            .append_event(EventRecord {
                id: Uuid::new_v4().to_string(),
                timestamp: at,
                kind: "test_run_aborted".to_string(),
                station: station.clone(),
                device: None,
                detail: format!("run {run_id} aborted: {reason}"),
            })
            .await;
        self.untrack(run_id).await;
        info!(run_id, reason, "test run aborted");
    }
}
