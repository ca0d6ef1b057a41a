//! Test harness for isolated orchestrator runs.
//!
//! The `TestHarness` owns a temporary SQLite file and one set of scripted
//! collaborators. Every call to [`TestHarness::orchestrator`] opens a fresh
//! database handle, so building a second orchestrator behaves like a new
//! process resuming from the same checkpoint file.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use listforge::checkpoint::{CheckpointStore, SqliteCheckpointStore};
use listforge::collaborators::Collaborators;
use listforge::config::{Config, RetryConfig, ServiceLimit};
use listforge::db::Database;
use listforge::orchestrator::{JobOrchestrator, RecoveryController, SubmitOptions};
use listforge::pipeline::ProgressReporter;
use listforge::ratelimit::Service;

use super::fakes::{FakeImages, FakeMarketplace, FakeMetadata, FakePricing};

pub const WORKER_A: &str = "worker-a";
pub const WORKER_B: &str = "worker-b";

pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub config: Config,
    pub metadata: Arc<FakeMetadata>,
    pub images: Arc<FakeImages>,
    pub pricing: Arc<FakePricing>,
    pub market: Arc<FakeMarketplace>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("listforge.db");
        let config = fast_config(db_path.clone());

        Self {
            temp_dir,
            db_path,
            config,
            metadata: Arc::new(FakeMetadata::default()),
            images: Arc::new(FakeImages::default()),
            pricing: Arc::new(FakePricing::default()),
            market: Arc::new(FakeMarketplace::default()),
        }
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            metadata: self.metadata.clone(),
            images: self.images.clone(),
            pricing: self.pricing.clone(),
            listing: self.market.clone(),
        }
    }

    /// A new store over its own connection to the harness database.
    pub fn sqlite_store(&self) -> SqliteCheckpointStore {
        let db = Database::open(&self.db_path).expect("Failed to open test database");
        SqliteCheckpointStore::new(db)
    }

    pub fn store(&self) -> Arc<dyn CheckpointStore> {
        Arc::new(self.sqlite_store())
    }

    pub fn orchestrator(&self) -> JobOrchestrator {
        self.orchestrator_as(WORKER_A)
    }

    pub fn orchestrator_as(&self, worker_id: &str) -> JobOrchestrator {
        self.orchestrator_on(worker_id, self.store())
    }

    pub fn orchestrator_on(
        &self,
        worker_id: &str,
        store: Arc<dyn CheckpointStore>,
    ) -> JobOrchestrator {
        let mut config = self.config.clone();
        config.worker_id = Some(worker_id.to_string());
        JobOrchestrator::with_store(&config, store, self.collaborators())
    }

    pub fn orchestrator_with_progress(
        &self,
        progress: Arc<dyn ProgressReporter>,
    ) -> JobOrchestrator {
        self.orchestrator().with_progress(progress)
    }

    pub fn recovery(&self) -> RecoveryController {
        self.recovery_for(self.orchestrator())
    }

    pub fn recovery_for(&self, orchestrator: JobOrchestrator) -> RecoveryController {
        RecoveryController::new(orchestrator, self.config.max_concurrent_jobs)
    }

    /// Submits `identifiers` with publishing enabled and returns the job id.
    pub fn submit(&self, identifiers: &[&str]) -> String {
        self.orchestrator()
            .submit(identifiers.iter().copied(), SubmitOptions::default())
            .expect("Failed to submit job")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Config with millisecond backoff and rate budgets no test can exhaust.
pub fn fast_config(db_path: PathBuf) -> Config {
    let mut config = Config {
        database_path: Some(db_path),
        worker_id: Some(WORKER_A.to_string()),
        call_timeout_ms: 2_000,
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
        },
        ..Config::default()
    };
    for service in Service::ALL {
        config.services.insert(
            service.as_str().to_string(),
            ServiceLimit {
                requests: 1_000,
                per_secs: 1,
                burst: Some(1_000),
                max_attempts: None,
            },
        );
    }
    config
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
