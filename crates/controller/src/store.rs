//! Durable store facade: an append-only measurement/event log plus
//! test-run records. Grounded on `persistence/journal.rs`'s sled-backed
//! `Journal` (generated big-endian ids for ordered iteration, `bincode`
//! encoding, explicit `flush`), generalized from a single events tree
//! into the three trees spec.md's data model calls for.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{EventRecord, Measurement, TestRun, TestRunStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("test run not found: {0}")]
    NotFound(String),
}

/// A failed measurement/event write degrades the caller (logged, not
/// fatal); only startup failure to open the database is fatal, per
/// spec.md §7.
#[async_trait]
pub trait Store: Send + Sync {
    async fn append_measurement(&self, measurement: Measurement) -> Result<(), StoreError>;
    async fn append_event(&self, event: EventRecord) -> Result<(), StoreError>;
    async fn start_test_run(&self, run: TestRun) -> Result<(), StoreError>;
    async fn finish_test_run(
        &self,
        id: &str,
        status: TestRunStatus,
        summary: Option<String>,
        finished_at: i64,
    ) -> Result<(), StoreError>;
    async fn list_test_runs(&self) -> Result<Vec<TestRun>, StoreError>;
    async fn get_test_run(&self, id: &str) -> Result<Option<TestRun>, StoreError>;
}

pub struct SledStore {
    db: sled::Db,
    measurements: sled::Tree,
    events: sled::Tree,
    test_runs: sled::Tree,
}

impl SledStore {
    pub fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let measurements = db.open_tree("measurements")?;
        let events = db.open_tree("events")?;
        let test_runs = db.open_tree("test_runs")?;
        Ok(Self {
            db,
            measurements,
            events,
            test_runs,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl Store for SledStore {
    async fn append_measurement(&self, measurement: Measurement) -> Result<(), StoreError> {
        let id = self.db.generate_id()?;
        let bytes = bincode::serialize(&measurement)?;
        self.measurements.insert(id.to_be_bytes(), bytes)?;
        Ok(())
    }

    async fn append_event(&self, event: EventRecord) -> Result<(), StoreError> {
        let id = self.db.generate_id()?;
        let bytes = bincode::serialize(&event)?;
        self.events.insert(id.to_be_bytes(), bytes)?;
        Ok(())
    }

    async fn start_test_run(&self, run: TestRun) -> Result<(), StoreError> {
        let bytes = bincode::serialize(&run)?;
        self.test_runs.insert(run.id.as_bytes(), bytes)?;
        Ok(())
    }

    async fn finish_test_run(
        &self,
        id: &str,
        status: TestRunStatus,
        summary: Option<String>,
        finished_at: i64,
    ) -> Result<(), StoreError> {
        let existing = self
            .test_runs
            .get(id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut run: TestRun = bincode::deserialize(&existing)?;
        run.status = status;
        run.summary = summary;
        run.finished_at = Some(finished_at);
        let bytes = bincode::serialize(&run)?;
        self.test_runs.insert(id.as_bytes(), bytes)?;
        Ok(())
    }

    async fn list_test_runs(&self) -> Result<Vec<TestRun>, StoreError> {
        let mut runs = Vec::new();
        for result in self.test_runs.iter() {
            let (_key, value) = result?;
            runs.push(bincode::deserialize(&value)?);
        }
        Ok(runs)
    }

    async fn get_test_run(&self, id: &str) -> Result<Option<TestRun>, StoreError> {
        match self.test_runs.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_secs;

    fn run(id: &str, station: &str) -> TestRun {
        TestRun {
            id: id.to_string(),
            script: "smoke.scpi".to_string(),
            started_at: now_secs(),
            finished_at: None,
            status: TestRunStatus::Running,
            station: station.to_string(),
            summary: None,
        }
    }

    #[tokio::test]
    async fn start_then_finish_test_run_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        store.start_test_run(run("run-1", "station-01")).await.unwrap();
        store
            .finish_test_run("run-1", TestRunStatus::Passed, Some("ok".to_string()), now_secs())
            .await
            .unwrap();

        let fetched = store.get_test_run("run-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, TestRunStatus::Passed);
        assert_eq!(fetched.summary, Some("ok".to_string()));
        assert!(fetched.finished_at.is_some());
    }

    #[tokio::test]
    async fn list_test_runs_returns_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.start_test_run(run("run-1", "station-01")).await.unwrap();
        store.start_test_run(run("run-2", "station-02")).await.unwrap();

        let runs = store.list_test_runs().await.unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn append_measurement_and_event_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store
            .append_measurement(Measurement {
                test_run: "run-1".to_string(),
                device: "fluke-8846a".to_string(),
                command: "measure_dc_voltage".to_string(),
                success: true,
                response: Some("1.234".to_string()),
                duration_ms: Some(150),
                timestamp: now_secs(),
            })
            .await
            .unwrap();
        store
            .append_event(EventRecord {
                id: "evt-1".to_string(),
                timestamp: now_secs(),
                kind: "estop_triggered".to_string(),
                station: Some("station-01".to_string()),
                device: None,
                detail: "button_press".to_string(),
            })
            .await
            .unwrap();
    }
}
