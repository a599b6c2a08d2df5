//! Stalled job detection
//!
//! A PROCESSING job whose last heartbeat is older than `heartbeat_timeout`
//! is stalled. Its run is halted and the job, still PROCESSING, is rerun
//! from PARSING at most `max_stalled` times; after that it is failed.

use super::JobOrchestrator;
use chrono::Utc;
use sked_common::events::ImportEvent;
use sked_common::Result;
use std::sync::Arc;

impl JobOrchestrator {
    /// One detection pass over all persisted jobs
    ///
    /// # Returns
    /// Number of stalled jobs handled (requeued or failed)
    pub async fn check_stalled_jobs(&self) -> Result<usize> {
        let now = Utc::now();
        let timeout = chrono::Duration::milliseconds(self.settings.heartbeat_timeout.as_millis() as i64);
        let max_stalled = self.settings.max_stalled;
        let mut handled = 0;

        for job in self.jobs.list_all().await? {
            if !job.is_stalled(now, timeout) {
                continue;
            }

            let (job, requeue) = self
                .jobs
                .update(&job.id, |job| {
                    // Re-check under the lock; a heartbeat may have landed
                    if !job.is_stalled(now, timeout) {
                        return Ok(None);
                    }
                    job.stall_count += 1;
                    let requeue = job.stall_count <= max_stalled;
                    if requeue {
                        job.schedule_rerun(now)?;
                    }
                    Ok(Some(requeue))
                })
                .await?;
            let Some(requeue) = requeue else {
                continue;
            };

            handled += 1;
            self.cancel_run(&job.id).await;
            self.event_bus.emit_lossy(ImportEvent::JobStalled {
                job_id: job.id.clone(),
                stall_count: job.stall_count,
                requeued: requeue,
                timestamp: Utc::now(),
            });

            if requeue {
                tracing::warn!(job_id = %job.id, stall_count = job.stall_count, "Stalled import job requeued");
                self.tracker.reset_clock(&job.id).await;
                self.enqueue(&job.id).await;
            } else {
                let reason = format!(
                    "Job stalled {} times without a progress heartbeat",
                    job.stall_count
                );
                self.tracker.fail_job(&job.id, &reason).await?;
                self.enforce_retention().await?;
            }
        }

        Ok(handled)
    }

    pub(super) async fn stall_monitor_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.stall_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.check_stalled_jobs().await {
                        tracing::warn!(error = %e, "Stall check failed");
                    }
                }
            }
        }
        tracing::debug!("Stall monitor stopped");
    }
}
