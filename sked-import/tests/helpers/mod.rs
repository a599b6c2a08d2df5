//! Test Helper Utilities
//!
//! Shared utilities for testing sked-import: fake collaborators and a
//! harness wiring the full service stack on an in-memory store.

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{FakeBlobStore, FakeDirectory, FakeSink, SinkBehavior};

use sked_common::events::{EventBus, JobStatus};
use sked_import::collaborators::Collaborators;
use sked_import::db::{JobRepository, KvStore, MemoryStore, SnapshotRepository};
use sked_import::models::{ConfidenceThresholds, ImportJob, NormalizationOptions, ParsedData};
use sked_import::services::{ImportPipeline, JobOrchestrator, OrchestratorSettings, ProgressTracker, ReviewEngine};
use std::sync::Arc;
use std::time::Duration;

pub const USER: &str = "user-1";

/// Settings tuned for fast tests
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        workers: 2,
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        heartbeat_timeout: Duration::from_secs(30),
        stall_check_interval: Duration::from_secs(60),
        max_stalled: 2,
        keep_completed: 10,
        keep_failed: 50,
        dependency_timeout: Duration::from_secs(2),
        progress_batch: 2,
        normalization: NormalizationOptions::default(),
    }
}

/// Venue upload: `Room Name`, `Capacity`
pub fn venue_file(rows: &[(&str, &str)]) -> ParsedData {
    ParsedData::from_records(
        ["Room Name", "Capacity"],
        rows.iter().map(|(name, capacity)| vec![*name, *capacity]).collect::<Vec<_>>(),
    )
}

/// `count` distinct, valid venue rows
pub fn venues(count: usize) -> ParsedData {
    let rows: Vec<(String, String)> = (1..=count)
        .map(|i| (format!("Room {}", i), format!("{}", 10 + i)))
        .collect();
    let refs: Vec<(&str, &str)> = rows.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    venue_file(&refs)
}

/// The full service stack on one in-memory store
pub struct Harness {
    pub store: Arc<dyn KvStore>,
    pub event_bus: EventBus,
    pub jobs: Arc<JobRepository>,
    pub tracker: Arc<ProgressTracker>,
    pub review: Arc<ReviewEngine>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub pipeline: ImportPipeline,
    pub blobs: Arc<FakeBlobStore>,
    pub sink: Arc<FakeSink>,
    pub directory: Arc<FakeDirectory>,
}

impl Harness {
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self::on_store(Arc::new(MemoryStore::new()), settings)
    }

    /// Build on an existing store (restart scenarios)
    pub fn on_store(store: Arc<dyn KvStore>, settings: OrchestratorSettings) -> Self {
        let event_bus = EventBus::new(1024);
        let jobs = Arc::new(JobRepository::new(Arc::clone(&store), None));
        let snapshots = SnapshotRepository::new(Arc::clone(&store), Duration::from_secs(3600));
        let tracker = Arc::new(ProgressTracker::new(
            Arc::clone(&jobs),
            snapshots,
            event_bus.clone(),
            10,
        ));

        let blobs = Arc::new(FakeBlobStore::default());
        let sink = Arc::new(FakeSink::default());
        let directory = Arc::new(FakeDirectory::default());
        let collaborators = Collaborators {
            blob_store: blobs.clone(),
            sink: sink.clone(),
            directory: directory.clone(),
        };

        let review = Arc::new(ReviewEngine::new(
            Arc::clone(&store),
            Duration::from_secs(3600),
            ConfidenceThresholds::default(),
        ));
        let dependency_timeout = settings.dependency_timeout;
        let normalization = settings.normalization.clone();
        let orchestrator = Arc::new(JobOrchestrator::new(
            Arc::clone(&jobs),
            Arc::clone(&tracker),
            collaborators.clone(),
            event_bus.clone(),
            settings,
        ));
        let pipeline = ImportPipeline::new(
            collaborators,
            normalization,
            Arc::clone(&review),
            Arc::clone(&orchestrator),
            dependency_timeout,
        );

        Self {
            store,
            event_bus,
            jobs,
            tracker,
            review,
            orchestrator,
            pipeline,
            blobs,
            sink,
            directory,
        }
    }

    /// Run a stored file through prepare → validate → review → commit
    ///
    /// Uses the proposed mappings unchanged and expects no undecided match.
    pub async fn submit(&self, file_id: &str) -> String {
        let prepared = self.pipeline.prepare(file_id).await.unwrap();
        let (frozen, validation) = self
            .pipeline
            .validate(&prepared, prepared.mapping_set())
            .unwrap();
        let session_id = format!("session-{}", file_id);
        self.pipeline
            .open_review(&session_id, USER, &prepared, &frozen, &validation, None)
            .await
            .unwrap();
        self.pipeline
            .commit(&session_id, USER, file_id, frozen, validation)
            .await
            .unwrap()
    }

    /// Store `data` under `file_id` and submit it
    pub async fn upload_and_submit(&self, file_id: &str, data: ParsedData) -> String {
        self.blobs.insert(file_id, data);
        self.submit(file_id).await
    }

    /// Poll until the job reaches a terminal state
    pub async fn wait_for_terminal(&self, job_id: &str) -> ImportJob {
        self.wait_for(job_id, |job| job.status.is_terminal()).await
    }

    /// Poll until `predicate` holds for the job (5 s budget)
    pub async fn wait_for<F>(&self, job_id: &str, predicate: F) -> ImportJob
    where
        F: Fn(&ImportJob) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = self.jobs.get(job_id).await.unwrap();
            if predicate(&job) {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} stuck in {} at {:?}",
                job_id,
                job.status,
                job.progress
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn status(&self, job_id: &str) -> JobStatus {
        self.jobs.get(job_id).await.unwrap().status
    }
}
