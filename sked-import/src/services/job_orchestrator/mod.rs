//! Import job orchestrator
//!
//! Queues committed imports and executes them on a bounded worker pool.
//!
//! # State Progression
//! PENDING → PROCESSING → {COMPLETED | FAILED | CANCELLED}
//!
//! While PROCESSING the stage cursor runs
//! PARSING → MAPPING → VALIDATION → ENTITY_CREATION → SCHEDULE_IMPORT → FINALIZATION.
//! Each stage lives in its own `stage_*` module as an `impl JobOrchestrator`
//! block. Stages run strictly in order; cancellation is observed between
//! stages and before every progress report.
//!
//! # Failure handling
//! - `Transient` stage errors keep the job PROCESSING, rewind the stage
//!   cursor to PARSING and rerun it after `base_delay * 2^(attempt-1)`, up to
//!   `max_attempts` attempts in total
//! - any other stage error fails the job at once
//! - a PROCESSING job whose heartbeat is older than `heartbeat_timeout` is
//!   rerun up to `max_stalled` times, then failed (see `stall_monitor`)
//! - stages heartbeat after every collaborator call

use crate::collaborators::Collaborators;
use crate::db::jobs::JobRepository;
use crate::models::column_mapping::{EntityType, MappedRow};
use crate::models::import_job::{AttemptRecord, ImportJob, ImportJobSpec, RowFailure};
use crate::models::normalization::NormalizationOptions;
use crate::models::parsed_data::ParsedData;
use crate::services::progress_tracker::{ProgressTracker, ProgressUpdate};
use chrono::Utc;
use sked_common::events::{EventBus, ImportEvent, ImportStage, JobStatus};
use sked_common::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod stage_entity_creation;
mod stage_finalization;
mod stage_mapping;
mod stage_parsing;
mod stage_schedule_import;
mod stage_validation;
mod stall_monitor;

/// Worker pool, retry, stall and retention settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Parallel jobs
    pub workers: usize,
    /// Attempts per job, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub heartbeat_timeout: Duration,
    pub stall_check_interval: Duration,
    /// Requeues allowed before a stalled job is failed
    pub max_stalled: u32,
    pub keep_completed: usize,
    pub keep_failed: usize,
    /// Upper bound for every collaborator call
    pub dependency_timeout: Duration,
    /// Rows between progress reports inside a stage
    pub progress_batch: usize,
    pub normalization: NormalizationOptions,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(30),
            stall_check_interval: Duration::from_secs(5),
            max_stalled: 2,
            keep_completed: 10,
            keep_failed: 50,
            dependency_timeout: Duration::from_secs(10),
            progress_batch: 25,
            normalization: NormalizationOptions::default(),
        }
    }
}

/// How a run ended when no error escaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Completed,
    /// Cancelled, stalled out or shutting down; someone else owns the job now
    Halted,
}

/// Working state of one run of one job
pub(super) struct JobRun {
    job: ImportJob,
    cancel: CancellationToken,
    data: Option<ParsedData>,
    mapped: Vec<MappedRow>,
    /// Rows whose outcome is not yet counted
    live: BTreeSet<usize>,
    /// Entity ids each live schedule row resolved to
    entity_ids: BTreeMap<usize, BTreeMap<EntityType, String>>,
}

impl JobRun {
    fn new(job: ImportJob, cancel: CancellationToken) -> Self {
        Self {
            job,
            cancel,
            data: None,
            mapped: Vec::new(),
            live: BTreeSet::new(),
            entity_ids: BTreeMap::new(),
        }
    }

    fn job_id(&self) -> &str {
        &self.job.id
    }
}

/// Per-stage row outcomes not yet reported
#[derive(Debug, Default)]
pub(super) struct RowTally {
    succeeded: Vec<usize>,
    failures: Vec<RowFailure>,
}

impl RowTally {
    fn succeed(&mut self, row_index: usize) {
        self.succeeded.push(row_index);
    }

    fn fail(&mut self, row_index: usize, stage: ImportStage, message: impl Into<String>) {
        self.failures.push(RowFailure {
            row_index,
            stage,
            message: message.into(),
        });
    }

    fn pending(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }
}

/// Import job orchestrator
pub struct JobOrchestrator {
    jobs: Arc<JobRepository>,
    tracker: Arc<ProgressTracker>,
    collaborators: Collaborators,
    event_bus: EventBus,
    settings: OrchestratorSettings,
    queue: Mutex<VecDeque<String>>,
    queue_signal: Notify,
    /// job id → (run generation, run token)
    running: Mutex<HashMap<String, (u64, CancellationToken)>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobOrchestrator {
    /// Create an orchestrator; call [`JobOrchestrator::start`] to run workers
    ///
    /// # Arguments
    /// * `jobs` - Job persistence
    /// * `tracker` - Progress tracker sharing the same job repository
    /// * `collaborators` - Blob store, sink and entity directory
    /// * `event_bus` - Bus for lifecycle events
    /// * `settings` - Pool width, retry, stall and retention settings
    pub fn new(
        jobs: Arc<JobRepository>,
        tracker: Arc<ProgressTracker>,
        collaborators: Collaborators,
        event_bus: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            jobs,
            tracker,
            collaborators,
            event_bus,
            settings,
            queue: Mutex::new(VecDeque::new()),
            queue_signal: Notify::new(),
            running: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Spawn the worker pool and the stall monitor
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        let width = self.settings.workers.max(1);
        for worker in 0..width {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move { this.worker_loop(worker).await }));
        }
        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move { this.stall_monitor_loop().await }));

        tracing::info!(workers = width, "Job orchestrator started");
    }

    /// Stop workers and the stall monitor
    ///
    /// Runs in flight are halted at their next cancellation check and stay
    /// PROCESSING in storage; [`JobOrchestrator::recover`] picks them up.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Orchestrator task ended abnormally: {}", e);
            }
        }
        tracing::info!("Job orchestrator stopped");
    }

    /// Persist a new job and enqueue it; returns immediately
    ///
    /// # Errors
    /// `Validation` when the validation result has no importable row
    pub async fn create_import_job(&self, spec: ImportJobSpec) -> Result<String> {
        if !spec.validation_result.is_valid {
            return Err(Error::Validation(format!(
                "File {} has no importable rows ({} of {} invalid)",
                spec.file_id, spec.validation_result.invalid_rows, spec.validation_result.total_rows
            )));
        }

        let job = ImportJob::new(spec);
        self.jobs.save(&job).await?;
        self.enqueue(&job.id).await;

        tracing::info!(job_id = %job.id, user_id = %job.user_id, file_id = %job.file_id, "Import job queued");
        self.event_bus.emit_lossy(ImportEvent::JobQueued {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(job.id)
    }

    /// Job owned by `user_id`
    pub async fn get_job(&self, job_id: &str, user_id: &str) -> Result<ImportJob> {
        let job = self.jobs.get(job_id).await?;
        if job.user_id != user_id {
            return Err(Error::NotFound(format!("Import job {}", job_id)));
        }
        Ok(job)
    }

    /// A user's jobs, newest first
    pub async fn list_recent(&self, user_id: &str, limit: usize) -> Result<Vec<ImportJob>> {
        let mut jobs: Vec<ImportJob> = self
            .jobs
            .list_all()
            .await?
            .into_iter()
            .filter(|job| job.user_id == user_id)
            .collect();
        jobs.reverse();
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Cancel a pending or processing job
    ///
    /// # Returns
    /// `false` without error when the job is already terminal
    pub async fn cancel_job(&self, job_id: &str, user_id: &str) -> Result<bool> {
        self.get_job(job_id, user_id).await?;

        let (job, cancelled) = self
            .jobs
            .update(job_id, |job| {
                if job.status.is_terminal() {
                    return Ok(false);
                }
                job.transition_to(JobStatus::Cancelled)?;
                Ok(true)
            })
            .await?;

        if !cancelled {
            tracing::debug!(job_id, status = %job.status, "Cancel ignored for terminal job");
            return Ok(false);
        }

        self.cancel_run(job_id).await;
        self.queue.lock().await.retain(|id| id != job_id);
        self.tracker.finish_terminal(&job).await?;

        tracing::info!(job_id, user_id, "Import job cancelled");
        self.event_bus.emit_lossy(ImportEvent::JobCancelled {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// Run a failed job again from PARSING with the same identity and inputs
    ///
    /// # Errors
    /// `Conflict` unless the job is FAILED
    pub async fn retry_job(&self, job_id: &str, user_id: &str) -> Result<()> {
        self.get_job(job_id, user_id).await?;

        self.jobs
            .update(job_id, |job| {
                if job.status != JobStatus::Failed {
                    return Err(Error::Conflict(format!(
                        "Only failed jobs can be retried, job {} is {}",
                        job.id, job.status
                    )));
                }
                job.reset_for_retry()
            })
            .await?;
        self.enqueue(job_id).await;

        tracing::info!(job_id, user_id, "Import job retry requested");
        self.event_bus.emit_lossy(ImportEvent::JobQueued {
            job_id: job_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Requeue persisted PENDING and PROCESSING jobs, oldest first
    ///
    /// Interrupted PROCESSING jobs stay PROCESSING and rerun from PARSING.
    /// Call once at startup, before [`JobOrchestrator::start`].
    pub async fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for job in self.jobs.list_all().await? {
            match job.status {
                JobStatus::Pending => {}
                JobStatus::Processing if job.rerun_at.is_some() => {}
                JobStatus::Processing => {
                    self.jobs
                        .update(&job.id, |job| job.schedule_rerun(Utc::now()))
                        .await?;
                }
                _ => continue,
            }
            self.enqueue(&job.id).await;
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(recovered, "Recovered unfinished import jobs");
        }
        Ok(recovered)
    }

    /// Jobs waiting for a worker
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Evict terminal jobs beyond the retention bounds
    ///
    /// Keeps the most recent `keep_completed` completed and `keep_failed`
    /// failed jobs; cancelled jobs only expire by TTL.
    pub async fn enforce_retention(&self) -> Result<usize> {
        let jobs = self.jobs.list_all().await?;
        let newest_first = |status: JobStatus| {
            let mut matching: Vec<&ImportJob> = jobs.iter().filter(|j| j.status == status).collect();
            matching.sort_by(|a, b| {
                b.completed_at
                    .cmp(&a.completed_at)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            });
            matching
        };

        let evict: Vec<String> = newest_first(JobStatus::Completed)
            .into_iter()
            .skip(self.settings.keep_completed)
            .chain(newest_first(JobStatus::Failed).into_iter().skip(self.settings.keep_failed))
            .map(|job| job.id.clone())
            .collect();

        for job_id in &evict {
            self.jobs.delete(job_id).await?;
        }
        if !evict.is_empty() {
            tracing::debug!(evicted = evict.len(), "Retention evicted terminal jobs");
        }
        Ok(evict.len())
    }

    async fn enqueue(&self, job_id: &str) {
        self.queue.lock().await.push_back(job_id.to_string());
        self.queue_signal.notify_one();
    }

    async fn next_job(&self) -> String {
        loop {
            let signalled = self.queue_signal.notified();
            if let Some(job_id) = self.queue.lock().await.pop_front() {
                return job_id;
            }
            signalled.await;
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        tracing::debug!(worker, "Worker started");
        loop {
            let job_id = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job_id = self.next_job() => job_id,
            };
            self.execute_job(&job_id).await;
        }
        tracing::debug!(worker, "Worker stopped");
    }

    async fn cancel_run(&self, job_id: &str) {
        if let Some((_, token)) = self.running.lock().await.remove(job_id) {
            token.cancel();
        }
    }

    /// One attempt of one job
    async fn execute_job(self: &Arc<Self>, job_id: &str) {
        let started = self
            .jobs
            .update(job_id, |job| {
                if job.awaiting_rerun() {
                    job.rerun_at = None;
                } else if job.status == JobStatus::Pending {
                    job.transition_to(JobStatus::Processing)?;
                } else {
                    return Err(Error::Conflict(format!("job is {}", job.status)));
                }
                let now = Utc::now();
                job.attempts += 1;
                job.started_at = Some(now);
                job.last_heartbeat = Some(now);
                Ok(job.attempts)
            })
            .await;

        let (job, attempt) = match started {
            Ok(started) => started,
            Err(Error::NotFound(_)) | Err(Error::Conflict(_)) => {
                // Cancelled, evicted or already running
                tracing::debug!(job_id, "Skipping dequeued job");
                return;
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Could not start import job");
                return;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        self.running
            .lock()
            .await
            .insert(job_id.to_string(), (generation, cancel.clone()));

        tracing::info!(job_id, attempt, "Import job started");
        self.event_bus.emit_lossy(ImportEvent::JobStarted {
            job_id: job_id.to_string(),
            attempt,
            timestamp: Utc::now(),
        });

        let mut run = JobRun::new(job, cancel.clone());
        match self.run_stages(&mut run).await {
            Ok(RunOutcome::Completed) => {}
            Ok(RunOutcome::Halted) => tracing::info!(job_id, attempt, "Import run halted"),
            Err(e) => self.handle_failure(job_id, attempt, e, &cancel).await,
        }

        let mut running = self.running.lock().await;
        if running.get(job_id).is_some_and(|(g, _)| *g == generation) {
            running.remove(job_id);
        }
    }

    async fn run_stages(&self, run: &mut JobRun) -> Result<RunOutcome> {
        for stage in ImportStage::ALL {
            if run.cancel.is_cancelled() {
                return Ok(RunOutcome::Halted);
            }
            match stage {
                ImportStage::Parsing => self.stage_parsing(run).await?,
                ImportStage::Mapping => self.stage_mapping(run).await?,
                ImportStage::Validation => self.stage_validation(run).await?,
                ImportStage::EntityCreation => self.stage_entity_creation(run).await?,
                ImportStage::ScheduleImport => self.stage_schedule_import(run).await?,
                ImportStage::Finalization => self.stage_finalization(run).await?,
            }
        }
        Ok(RunOutcome::Completed)
    }

    /// Backoff before attempt `attempt + 1`
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.settings.base_delay.saturating_mul(factor)
    }

    async fn handle_failure(self: &Arc<Self>, job_id: &str, attempt: u32, error: Error, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            tracing::debug!(job_id, error = %error, "Stage error after run was halted");
            return;
        }
        match self.jobs.load(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Processing && !job.awaiting_rerun() => {}
            Ok(_) => {
                tracing::debug!(job_id, error = %error, "Job finished elsewhere, dropping stage error");
                return;
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Could not load job after stage failure");
                return;
            }
        }

        let message = error.to_string();
        let retry = error.is_retryable() && attempt < self.settings.max_attempts;
        let delay = if retry { self.retry_delay(attempt) } else { Duration::ZERO };

        let record = AttemptRecord {
            attempt,
            delay_ms: delay.as_millis() as u64,
            error: message.clone(),
            failed_at: Utc::now(),
        };
        let logged = self
            .jobs
            .update(job_id, |job| {
                job.attempt_log.push(record);
                if retry {
                    let rerun_at = Utc::now()
                        + chrono::Duration::milliseconds(delay.as_millis() as i64);
                    job.schedule_rerun(rerun_at)?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = logged {
            tracing::error!(job_id, error = %e, "Could not record failed attempt");
            return;
        }

        if retry {
            tracing::warn!(
                job_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Import attempt failed, retrying"
            );
            self.event_bus.emit_lossy(ImportEvent::JobRetrying {
                job_id: job_id.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: message,
                timestamp: Utc::now(),
            });
            self.tracker.reset_clock(job_id).await;
            self.schedule_requeue(job_id, delay);
            return;
        }

        let reason = if error.is_retryable() {
            format!("Retries exhausted after {} attempts: {}", attempt, message)
        } else {
            message
        };
        if let Err(e) = self.tracker.fail_job(job_id, &reason).await {
            tracing::error!(job_id, error = %e, "Could not mark job failed");
            return;
        }
        if let Err(e) = self.enforce_retention().await {
            tracing::warn!(error = %e, "Retention pass failed");
        }
    }

    fn schedule_requeue(self: &Arc<Self>, job_id: &str, delay: Duration) {
        let this = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = this.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => this.enqueue(&job_id).await,
            }
        });
    }

    /// Fail fast once the run no longer owns the job
    fn ensure_current(&self, run: &JobRun) -> Result<()> {
        if run.cancel.is_cancelled() {
            return Err(Error::Conflict(format!("Run of job {} was halted", run.job.id)));
        }
        Ok(())
    }

    /// Refresh the heartbeat after a collaborator call
    async fn beat(&self, run: &JobRun) -> Result<()> {
        self.ensure_current(run)?;
        self.tracker.heartbeat(run.job_id()).await
    }

    /// Advance the stage cursor
    async fn enter_stage(&self, run: &JobRun, stage: ImportStage) -> Result<()> {
        self.ensure_current(run)?;
        tracing::info!(job_id = %run.job.id, stage = %stage, live_rows = run.live.len(), "Entering stage");
        self.tracker
            .update_progress(ProgressUpdate::new(run.job_id()).stage(stage))
            .await?;
        Ok(())
    }

    /// Report and persist counted rows
    async fn flush_tally(&self, run: &mut JobRun, tally: &mut RowTally) -> Result<()> {
        if tally.pending() == 0 {
            return Ok(());
        }
        self.ensure_current(run)?;

        let failures = std::mem::take(&mut tally.failures);
        let succeeded = std::mem::take(&mut tally.succeeded);
        for row_index in failures.iter().map(|f| f.row_index).chain(succeeded.iter().copied()) {
            run.live.remove(&row_index);
        }
        let succeeded = succeeded.len();

        if !failures.is_empty() {
            for failure in &failures {
                tracing::debug!(
                    job_id = %run.job.id,
                    row = failure.row_index,
                    stage = %failure.stage,
                    "Row failed: {}",
                    failure.message
                );
            }
            let failed = failures.len();
            self.jobs
                .update(run.job_id(), |job| {
                    job.row_failures.extend(failures);
                    Ok(())
                })
                .await?;
            self.tracker
                .update_progress(ProgressUpdate::new(run.job_id()).failed(failed).succeeded(succeeded))
                .await?;
        } else {
            self.tracker
                .update_progress(ProgressUpdate::new(run.job_id()).succeeded(succeeded))
                .await?;
        }
        Ok(())
    }
}
