//! Job orchestrator integration tests
//!
//! Worker pool, retry ceiling, cancellation, stall recovery, retention and
//! restart recovery against in-memory collaborators.

mod helpers;

use chrono::Utc;
use helpers::{fast_settings, venue_file, venues, Harness, SinkBehavior, USER};
use sked_common::events::{ImportEvent, ImportStage, JobStatus, ProgressSnapshot};
use sked_common::Error;
use sked_import::db::MemoryStore;
use sked_import::services::OrchestratorSettings;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_job_completes_with_every_row_succeeded() {
    let h = Harness::new(fast_settings());
    h.orchestrator.start().await;

    let job_id = h.upload_and_submit("rooms", venues(5)).await;
    let job = h.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total_rows, 5);
    assert_eq!(job.progress.successful_rows, 5);
    assert_eq!(job.progress.failed_rows, 0);
    assert_eq!(job.progress.current_stage, ImportStage::Finalization);
    assert_eq!(job.attempts, 1);
    assert!(job.completed_at.is_some());
    assert_eq!(h.sink.entities().len(), 5);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_partial_success_keeps_row_failures() {
    let h = Harness::new(fast_settings());
    h.sink.set_behavior(SinkBehavior {
        conflicting_names: ["Room B".to_string()].into_iter().collect(),
        ..Default::default()
    });
    h.orchestrator.start().await;

    let data = venue_file(&[("Room A", "20"), ("Room B", "30"), ("", "40"), ("Room D", "50")]);
    let job_id = h.upload_and_submit("mixed", data).await;
    let job = h.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.total_rows, 4);
    assert_eq!(job.progress.successful_rows, 2);
    assert_eq!(job.progress.failed_rows, 2);
    assert_eq!(
        job.progress.processed_rows,
        job.progress.successful_rows + job.progress.failed_rows
    );

    let mut failures: Vec<(usize, ImportStage)> = job
        .row_failures
        .iter()
        .map(|f| (f.row_index, f.stage))
        .collect();
    failures.sort();
    assert_eq!(
        failures,
        vec![(1, ImportStage::EntityCreation), (2, ImportStage::Validation)]
    );

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_transient_failures_stop_at_retry_ceiling() {
    let settings = OrchestratorSettings {
        max_attempts: 4,
        ..fast_settings()
    };
    let h = Harness::new(settings);
    h.blobs.insert("rooms", venues(100));
    let job_id = h.submit("rooms").await;

    h.sink.set_behavior(SinkBehavior {
        always_transient: true,
        ..Default::default()
    });
    let mut events = h.event_bus.subscribe();
    h.orchestrator.start().await;

    let job = h.wait_for_terminal(&job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 4);
    assert_eq!(job.attempt_log.len(), 4);
    assert!(job
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.contains("Retries exhausted")));

    let delays: Vec<u64> = job.attempt_log.iter().map(|a| a.delay_ms).collect();
    assert_eq!(delays, vec![10, 20, 40, 0]);
    assert!(delays[..3].windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        h.orchestrator.retry_delay(1) * 2,
        h.orchestrator.retry_delay(2)
    );

    // Started every attempt, FAILED once
    let mut started = 0;
    let mut retrying = 0;
    let mut failed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ImportEvent::JobStarted { .. } => started += 1,
            ImportEvent::JobRetrying { .. } => retrying += 1,
            ImportEvent::JobFailed { .. } => failed += 1,
            _ => {}
        }
    }
    assert_eq!((started, retrying, failed), (4, 3, 1));

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_job_waiting_for_retry_stays_processing() {
    let settings = OrchestratorSettings {
        max_attempts: 2,
        base_delay: Duration::from_millis(300),
        ..fast_settings()
    };
    let h = Harness::new(settings);
    h.blobs.insert("rooms", venues(3));
    let job_id = h.submit("rooms").await;
    h.sink.set_behavior(SinkBehavior {
        always_transient: true,
        ..Default::default()
    });
    h.orchestrator.start().await;

    let waiting = h.wait_for(&job_id, |job| job.attempt_log.len() == 1).await;
    assert_eq!(waiting.status, JobStatus::Processing);
    assert!(waiting.awaiting_rerun());
    assert_eq!(waiting.progress.current_stage, ImportStage::Parsing);
    assert_eq!(waiting.progress.processed_rows, 0);

    // Cancelling while the retry is pending is still allowed
    assert!(h.orchestrator.cancel_job(&job_id, USER).await.unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;
    let job = h.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.attempts, 1);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_non_transient_failure_skips_retries() {
    let h = Harness::new(fast_settings());
    h.blobs.insert("rooms", venues(3));
    let job_id = h.submit("rooms").await;
    h.blobs.remove("rooms");
    h.orchestrator.start().await;

    let job = h.wait_for_terminal(&job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.attempt_log.len(), 1);
    assert_eq!(job.attempt_log[0].delay_ms, 0);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_retry_job_reruns_failed_job() {
    let h = Harness::new(fast_settings());
    h.blobs.insert("rooms", venues(3));
    let job_id = h.submit("rooms").await;
    h.blobs.remove("rooms");
    h.orchestrator.start().await;
    assert_eq!(h.wait_for_terminal(&job_id).await.status, JobStatus::Failed);

    h.blobs.insert("rooms", venues(3));
    h.orchestrator.retry_job(&job_id, USER).await.unwrap();
    let job = h.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.successful_rows, 3);
    assert_eq!(job.failure_reason, None);

    let again = h.orchestrator.retry_job(&job_id, USER).await;
    assert!(matches!(again, Err(Error::Conflict(_))));

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let h = Harness::new(fast_settings());
    let job_id = h.upload_and_submit("rooms", venues(3)).await;
    assert_eq!(h.orchestrator.queue_len().await, 1);

    let err = h.orchestrator.cancel_job(&job_id, "someone-else").await;
    assert!(matches!(err, Err(Error::NotFound(_))));

    assert!(h.orchestrator.cancel_job(&job_id, USER).await.unwrap());
    assert_eq!(h.status(&job_id).await, JobStatus::Cancelled);
    assert_eq!(h.orchestrator.queue_len().await, 0);

    // Terminal: no-op
    assert!(!h.orchestrator.cancel_job(&job_id, USER).await.unwrap());

    h.orchestrator.start().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.status(&job_id).await, JobStatus::Cancelled);
    assert_eq!(h.blobs.fetches(), 1, "only the pipeline fetched the file");

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_cancel_processing_job_halts_at_next_check() {
    let h = Harness::new(fast_settings());
    h.sink.set_behavior(SinkBehavior {
        delay: Some(Duration::from_millis(40)),
        ..Default::default()
    });
    let job_id = h.upload_and_submit("rooms", venues(20)).await;
    h.orchestrator.start().await;

    h.wait_for(&job_id, |job| job.progress.current_stage == ImportStage::EntityCreation)
        .await;
    assert!(h.orchestrator.cancel_job(&job_id, USER).await.unwrap());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let job = h.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.progress.processed_rows < job.progress.total_rows);
    assert!(h.sink.calls() < 20);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_progress_snapshots_are_monotonic_and_bounded() {
    let h = Harness::new(fast_settings());
    let job_id = h
        .upload_and_submit(
            "rooms",
            venue_file(&[("A", "1"), ("B", "2"), ("", "3"), ("D", "4"), ("E", "5"), ("F", "6")]),
        )
        .await;

    let seen: Arc<Mutex<Vec<ProgressSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.tracker
        .subscribe(
            &job_id,
            Arc::new(move |snapshot: &ProgressSnapshot| sink.lock().unwrap().push(snapshot.clone())),
        )
        .await;

    h.orchestrator.start().await;
    h.wait_for_terminal(&job_id).await;

    let snapshots = seen.lock().unwrap().clone();
    assert!(snapshots.len() >= 3);
    for pair in snapshots.windows(2) {
        assert!(pair[0].processed_rows <= pair[1].processed_rows);
    }
    for snapshot in &snapshots {
        assert!(snapshot.processed_rows <= snapshot.total_rows);
        assert!((0.0..=100.0).contains(&snapshot.percentage));
    }

    let last = snapshots.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.processed_rows, 6);
    assert_eq!(last.successful_rows + last.failed_rows, last.processed_rows);
    assert_eq!(last.failed_rows, 1);

    let retained = h.tracker.latest_snapshot(&job_id).await.unwrap().unwrap();
    assert_eq!(retained.status, JobStatus::Completed);

    h.orchestrator.shutdown().await;
}

/// Put the job in a running PROCESSING state with the given heartbeat
async fn mark_running(h: &Harness, job_id: &str, heartbeat_age: chrono::Duration) {
    h.jobs
        .update(job_id, |job| {
            if job.status == JobStatus::Pending {
                job.transition_to(JobStatus::Processing)?;
            }
            job.rerun_at = None;
            job.last_heartbeat = Some(Utc::now() - heartbeat_age);
            Ok(())
        })
        .await
        .unwrap();
}

/// Heartbeat a minute old
async fn mark_stalled(h: &Harness, job_id: &str) {
    mark_running(h, job_id, chrono::Duration::seconds(60)).await;
}

#[tokio::test]
async fn test_stalled_job_requeued_then_failed() {
    let settings = OrchestratorSettings {
        max_stalled: 1,
        heartbeat_timeout: Duration::from_millis(100),
        ..fast_settings()
    };
    let h = Harness::new(settings);
    let job_id = h.upload_and_submit("rooms", venues(2)).await;

    // Fresh heartbeat: not stalled
    mark_running(&h, &job_id, chrono::Duration::zero()).await;
    assert_eq!(h.orchestrator.check_stalled_jobs().await.unwrap(), 0);

    mark_stalled(&h, &job_id).await;
    assert_eq!(h.orchestrator.check_stalled_jobs().await.unwrap(), 1);
    let job = h.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert!(job.awaiting_rerun());
    assert_eq!(job.progress.current_stage, ImportStage::Parsing);
    assert_eq!(job.stall_count, 1);
    assert_eq!(h.orchestrator.queue_len().await, 2);

    // Waiting for its rerun, the job is not stalled again
    assert_eq!(h.orchestrator.check_stalled_jobs().await.unwrap(), 0);

    mark_stalled(&h, &job_id).await;
    assert_eq!(h.orchestrator.check_stalled_jobs().await.unwrap(), 1);
    let job = h.jobs.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.stall_count, 2);
    assert!(job.failure_reason.unwrap().contains("stalled"));
}

#[tokio::test]
async fn test_slow_sink_heartbeats_keep_job_alive() {
    let settings = OrchestratorSettings {
        heartbeat_timeout: Duration::from_millis(300),
        stall_check_interval: Duration::from_millis(50),
        dependency_timeout: Duration::from_millis(250),
        progress_batch: 25,
        ..fast_settings()
    };
    let h = Harness::new(settings);
    h.sink.set_behavior(SinkBehavior {
        delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    h.orchestrator.start().await;

    // Six calls of 100 ms each: the stage outlasts the heartbeat timeout
    let job_id = h.upload_and_submit("rooms", venues(6)).await;
    let job = h.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.stall_count, 0);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.progress.successful_rows, 6);
    assert_eq!(h.sink.calls(), 6);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_retention_keeps_most_recent_completed() {
    let settings = OrchestratorSettings {
        workers: 1,
        keep_completed: 2,
        ..fast_settings()
    };
    let h = Harness::new(settings);
    h.orchestrator.start().await;

    let mut ids = Vec::new();
    for i in 0..3 {
        let job_id = h.upload_and_submit(&format!("rooms-{}", i), venues(2)).await;
        h.wait_for_terminal(&job_id).await;
        ids.push(job_id);
    }

    let oldest = h.orchestrator.get_job(&ids[0], USER).await;
    assert!(matches!(oldest, Err(Error::NotFound(_))));
    let recent = h.orchestrator.list_recent(USER, 10).await.unwrap();
    let recent_ids: Vec<&str> = recent.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(recent_ids, vec![ids[2].as_str(), ids[1].as_str()]);

    h.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_recover_requeues_unfinished_jobs_after_restart() {
    let store = Arc::new(MemoryStore::new());
    let first = Harness::on_store(store.clone(), fast_settings());
    let pending = first.upload_and_submit("a", venues(2)).await;
    let interrupted = first.upload_and_submit("b", venues(3)).await;
    first
        .jobs
        .update(&interrupted, |job| {
            job.transition_to(JobStatus::Processing)?;
            job.progress.processed_rows = 1;
            Ok(())
        })
        .await
        .unwrap();

    // New process on the same store
    let second = Harness::on_store(store, fast_settings());
    second.blobs.insert("a", venues(2));
    second.blobs.insert("b", venues(3));
    assert_eq!(second.orchestrator.recover().await.unwrap(), 2);
    let rewound = second.jobs.get(&interrupted).await.unwrap();
    assert_eq!(rewound.status, JobStatus::Processing);
    assert!(rewound.awaiting_rerun());
    assert_eq!(rewound.progress.processed_rows, 0);
    second.orchestrator.start().await;

    for (job_id, rows) in [(&pending, 2), (&interrupted, 3)] {
        let job = second.wait_for_terminal(job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress.successful_rows, rows);
    }

    second.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_validation_result_rejected() {
    let h = Harness::new(fast_settings());
    h.blobs.insert("blank", venue_file(&[("", "10")]));

    let prepared = h.pipeline.prepare("blank").await.unwrap();
    let (frozen, validation) = h
        .pipeline
        .validate(&prepared, prepared.mapping_set())
        .unwrap();
    assert!(!validation.is_valid);

    let result = h
        .orchestrator
        .create_import_job(sked_import::models::ImportJobSpec {
            user_id: USER.to_string(),
            file_id: "blank".to_string(),
            mapping_config: frozen,
            validation_result: validation,
            resolved_entities: Default::default(),
        })
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert_eq!(h.orchestrator.queue_len().await, 0);
}
