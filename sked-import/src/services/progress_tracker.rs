//! Job progress tracking
//!
//! Maintains per-job counters on the persisted job record, measures
//! throughput per stage and derives the ETA. Every update writes the job
//! heartbeat, retains a snapshot for late subscribers, calls the local
//! subscriber (if any) and broadcasts `ProgressUpdated` on the event bus.
//!
//! In-memory tracking state (stage timers, throughput window, subscriber)
//! is released as soon as a job reaches a terminal state.

use crate::db::jobs::JobRepository;
use crate::db::snapshots::SnapshotRepository;
use crate::models::import_job::{ImportJob, ImportProgress};
use chrono::Utc;
use sked_common::events::{EventBus, ImportEvent, ImportStage, JobStatus, ProgressSnapshot};
use sked_common::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Default number of throughput samples averaged for the ETA
pub const DEFAULT_THROUGHPUT_WINDOW: usize = 10;

/// Local subscriber; must not block
pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Incremental progress report from a running stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub job_id: String,
    /// Advance the stage cursor; never moves backwards
    pub stage: Option<ImportStage>,
    /// Rows newly finished successfully
    pub succeeded: usize,
    /// Rows newly finished as failures
    pub failed: usize,
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Default::default()
        }
    }

    pub fn stage(mut self, stage: ImportStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn succeeded(mut self, rows: usize) -> Self {
        self.succeeded = rows;
        self
    }

    pub fn failed(mut self, rows: usize) -> Self {
        self.failed = rows;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Stage timer and throughput history for one job
#[derive(Debug)]
struct StageClock {
    stage: ImportStage,
    started: Instant,
    processed_at_start: usize,
    samples: VecDeque<f64>,
}

impl StageClock {
    fn start(stage: ImportStage, processed: usize) -> Self {
        Self {
            stage,
            started: Instant::now(),
            processed_at_start: processed,
            samples: VecDeque::new(),
        }
    }

    fn enter_stage(&mut self, stage: ImportStage, processed: usize) {
        self.stage = stage;
        self.started = Instant::now();
        self.processed_at_start = processed;
    }

    /// Rows per second: a fresh per-stage sample when rows moved in this
    /// stage, else the window average, else unknown
    fn measure(&mut self, processed: usize, window: usize) -> Option<f64> {
        let rows = processed.saturating_sub(self.processed_at_start);
        let elapsed = self.started.elapsed().as_secs_f64();

        if rows > 0 && elapsed > 0.0 {
            let sample = rows as f64 / elapsed;
            self.samples.push_back(sample);
            while self.samples.len() > window {
                self.samples.pop_front();
            }
            return Some(sample);
        }

        if self.samples.is_empty() {
            None
        } else {
            Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
        }
    }
}

/// Seconds remaining at `speed` rows per second
pub fn estimate_remaining(progress: &ImportProgress, speed: Option<f64>) -> Option<f64> {
    let speed = speed.filter(|s| s.is_finite() && *s > 0.0)?;
    let remaining = progress.total_rows.saturating_sub(progress.processed_rows);
    Some(remaining as f64 / speed)
}

pub struct ProgressTracker {
    jobs: Arc<JobRepository>,
    snapshots: SnapshotRepository,
    event_bus: EventBus,
    throughput_window: usize,
    clocks: Mutex<HashMap<String, StageClock>>,
    subscribers: RwLock<HashMap<String, ProgressCallback>>,
}

impl ProgressTracker {
    pub fn new(
        jobs: Arc<JobRepository>,
        snapshots: SnapshotRepository,
        event_bus: EventBus,
        throughput_window: usize,
    ) -> Self {
        Self {
            jobs,
            snapshots,
            event_bus,
            throughput_window: throughput_window.max(1),
            clocks: Mutex::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register the local callback for a job, replacing any previous one
    pub async fn subscribe(&self, job_id: &str, callback: ProgressCallback) {
        self.subscribers
            .write()
            .await
            .insert(job_id.to_string(), callback);
    }

    pub async fn unsubscribe(&self, job_id: &str) -> bool {
        self.subscribers.write().await.remove(job_id).is_some()
    }

    /// Jobs with live in-memory tracking state
    pub async fn tracked_jobs(&self) -> usize {
        let clocks = self.clocks.lock().await.len();
        let subscribers = self.subscribers.read().await.len();
        clocks.max(subscribers)
    }

    /// Latest retained snapshot
    pub async fn latest_snapshot(&self, job_id: &str) -> Result<Option<ProgressSnapshot>> {
        self.snapshots.latest(job_id).await
    }

    /// Seed progress at zero rows and mark the job `PROCESSING`
    ///
    /// # Errors
    /// `NotFound` for an unknown job, `Conflict` for a terminal one
    pub async fn initialize_progress(
        &self,
        job_id: &str,
        total_rows: usize,
        initial_stage: ImportStage,
    ) -> Result<ProgressSnapshot> {
        let (job, old_status) = self
            .jobs
            .update(job_id, |job| {
                if job.status != JobStatus::Pending {
                    ensure_running(job)?;
                }
                job.progress = ImportProgress {
                    total_rows,
                    current_stage: initial_stage,
                    ..ImportProgress::default()
                };
                job.row_failures.clear();
                job.last_heartbeat = Some(Utc::now());
                if job.started_at.is_none() {
                    job.started_at = Some(Utc::now());
                }
                if job.status == JobStatus::Pending {
                    job.transition_to(JobStatus::Processing)
                } else {
                    Ok(job.status)
                }
            })
            .await?;

        self.clocks
            .lock()
            .await
            .insert(job_id.to_string(), StageClock::start(initial_stage, 0));

        tracing::info!(
            job_id,
            total_rows,
            stage = %initial_stage,
            from = %old_status,
            "Progress initialized"
        );

        let snapshot = job.snapshot(None, None);
        self.publish(&snapshot).await?;
        Ok(snapshot)
    }

    /// Apply one incremental update
    ///
    /// # Errors
    /// `NotFound` for an unknown job, `Conflict` when the job is not
    /// processing, `Validation` when the stage would regress or processed
    /// rows would exceed the total.
    pub async fn update_progress(&self, update: ProgressUpdate) -> Result<ProgressSnapshot> {
        let (job, old_stage) = self
            .jobs
            .update(&update.job_id, |job| {
                ensure_running(job)?;

                let progress = &mut job.progress;
                let old_stage = progress.current_stage;
                if let Some(stage) = update.stage {
                    if stage < old_stage {
                        return Err(Error::Validation(format!(
                            "Stage cannot move back from {} to {}",
                            old_stage, stage
                        )));
                    }
                    progress.current_stage = stage;
                }

                let processed = progress.processed_rows + update.succeeded + update.failed;
                if processed > progress.total_rows {
                    return Err(Error::Validation(format!(
                        "Processed rows {} would exceed total {}",
                        processed, progress.total_rows
                    )));
                }
                progress.successful_rows += update.succeeded;
                progress.failed_rows += update.failed;
                progress.processed_rows = processed;

                job.last_heartbeat = Some(Utc::now());
                Ok(old_stage)
            })
            .await?;

        let new_stage = job.progress.current_stage;
        let throughput = {
            let mut clocks = self.clocks.lock().await;
            let clock = clocks
                .entry(job.id.clone())
                .or_insert_with(|| StageClock::start(old_stage, job.progress.processed_rows));
            if new_stage != clock.stage {
                // Rows finished with this update count toward the stage just left
                clock.measure(job.progress.processed_rows, self.throughput_window);
                clock.enter_stage(new_stage, job.progress.processed_rows);
                None
            } else {
                clock.measure(job.progress.processed_rows, self.throughput_window)
            }
        };

        if new_stage != old_stage {
            tracing::info!(job_id = %job.id, from = %old_stage, to = %new_stage, "Stage changed");
            self.event_bus.emit_lossy(ImportEvent::StageChanged {
                job_id: job.id.clone(),
                old_stage,
                new_stage,
                timestamp: Utc::now(),
            });
        }

        let throughput = match throughput {
            Some(t) => Some(t),
            None => self.window_average(&job.id).await,
        };

        let eta = estimate_remaining(&job.progress, throughput);
        let job = if job.progress.estimated_time_remaining != eta {
            let (job, _) = self
                .jobs
                .update(&job.id, |j| {
                    j.progress.estimated_time_remaining = eta;
                    Ok(())
                })
                .await?;
            job
        } else {
            job
        };

        tracing::debug!(
            job_id = %job.id,
            stage = %new_stage,
            processed = job.progress.processed_rows,
            total = job.progress.total_rows,
            "Progress updated"
        );

        let snapshot = job.snapshot(throughput, update.message);
        self.publish(&snapshot).await?;
        Ok(snapshot)
    }

    /// Refresh the heartbeat without changing counters
    pub async fn heartbeat(&self, job_id: &str) -> Result<()> {
        self.jobs
            .update(job_id, |job| {
                if job.status == JobStatus::Processing && !job.awaiting_rerun() {
                    job.last_heartbeat = Some(Utc::now());
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Mark the job `COMPLETED` and release its tracking state
    pub async fn complete_job(&self, job_id: &str) -> Result<ProgressSnapshot> {
        let (job, _) = self
            .jobs
            .update(job_id, |job| {
                ensure_running(job)?;
                job.progress.current_stage = ImportStage::Finalization;
                job.transition_to(JobStatus::Completed)?;
                Ok(())
            })
            .await?;

        tracing::info!(
            job_id,
            successful_rows = job.progress.successful_rows,
            failed_rows = job.progress.failed_rows,
            "Import job completed"
        );

        let snapshot = job.snapshot(None, Some("Import completed".to_string()));
        self.publish(&snapshot).await?;
        self.event_bus.emit_lossy(ImportEvent::JobCompleted {
            job_id: job.id.clone(),
            successful_rows: job.progress.successful_rows,
            failed_rows: job.progress.failed_rows,
            timestamp: Utc::now(),
        });
        self.release(job_id).await;
        Ok(snapshot)
    }

    /// Mark the job `FAILED` with a reason and release its tracking state
    pub async fn fail_job(&self, job_id: &str, reason: &str) -> Result<ProgressSnapshot> {
        let (job, _) = self
            .jobs
            .update(job_id, |job| {
                ensure_active(job)?;
                job.transition_to(JobStatus::Failed)?;
                job.failure_reason = Some(reason.to_string());
                Ok(())
            })
            .await?;

        tracing::error!(job_id, reason, "Import job failed");

        let snapshot = job.snapshot(None, Some(reason.to_string()));
        self.publish(&snapshot).await?;
        self.event_bus.emit_lossy(ImportEvent::JobFailed {
            job_id: job.id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        self.release(job_id).await;
        Ok(snapshot)
    }

    /// Publish the final state of a job finished elsewhere (cancellation)
    pub async fn finish_terminal(&self, job: &ImportJob) -> Result<()> {
        let snapshot = job.snapshot(None, job.failure_reason.clone());
        self.publish(&snapshot).await?;
        self.release(&job.id).await;
        Ok(())
    }

    /// Drop stage timers, throughput history and the subscriber for a job
    pub async fn release(&self, job_id: &str) {
        self.clocks.lock().await.remove(job_id);
        self.subscribers.write().await.remove(job_id);
    }

    /// Drop stage timers only, keeping the subscriber (requeue)
    pub async fn reset_clock(&self, job_id: &str) {
        self.clocks.lock().await.remove(job_id);
    }

    async fn window_average(&self, job_id: &str) -> Option<f64> {
        let clocks = self.clocks.lock().await;
        let samples = &clocks.get(job_id)?.samples;
        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum::<f64>() / samples.len() as f64)
        }
    }

    async fn publish(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.snapshots.save(snapshot).await?;

        // Clone out of the lock so the callback never runs under it
        let callback = self.subscribers.read().await.get(&snapshot.job_id).cloned();
        if let Some(callback) = callback {
            callback(snapshot);
        }

        self.event_bus.emit_lossy(ImportEvent::ProgressUpdated {
            snapshot: snapshot.clone(),
        });
        Ok(())
    }
}

/// PROCESSING with a run attached
fn ensure_running(job: &ImportJob) -> Result<()> {
    if job.awaiting_rerun() {
        return Err(Error::Conflict(format!("Job {} is waiting for a rerun", job.id)));
    }
    if job.status != JobStatus::Processing {
        return Err(Error::Conflict(format!(
            "Job {} is {}, not accepting progress",
            job.id, job.status
        )));
    }
    Ok(())
}

fn ensure_active(job: &ImportJob) -> Result<()> {
    if job.status.is_terminal() {
        return Err(Error::Conflict(format!(
            "Job {} is already {}",
            job.id, job.status
        )));
    }
    Ok(())
}
