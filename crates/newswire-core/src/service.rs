use crate::article::ArticleDescriptor;
use crate::dedup::{Deduplicator, Disposition};
use crate::error::AppError;
use crate::event::JobUpdate;
use crate::job::{Job, JobStatus, NewJob};
use crate::queue::WorkQueue;
use crate::store::Store;
use crate::traits::UpdatePublisher;
use crate::util;

/// Largest accepted submission batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Orchestrates job intake and cancellation: validation, dedup, job
/// creation, queue publication and progress events.
#[derive(Clone)]
pub struct JobService<S, Q, B>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    store: S,
    queue: Q,
    bus: B,
}

impl<S, Q, B> JobService<S, Q, B>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    pub fn new(store: S, queue: Q, bus: B) -> Self {
        Self { store, queue, bus }
    }

    /// Ingest a batch of article descriptors and return the created job.
    ///
    /// The job row is written before any work item becomes visible to a
    /// worker, so a popped item always resolves to an existing job.
    pub async fn submit(&self, batch: &[ArticleDescriptor]) -> Result<Job, AppError> {
        if batch.is_empty() {
            return Err(AppError::Validation(
                "Batch must contain at least one article".into(),
            ));
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(AppError::Validation(format!(
                "Batch of {} exceeds the maximum of {}",
                batch.len(),
                MAX_BATCH_SIZE
            )));
        }
        for descriptor in batch {
            descriptor.validate()?;
        }

        let job_id = util::job_id();
        let dedup = Deduplicator::new(self.store.clone());
        let resolutions = dedup.resolve(&job_id, batch).await?;

        let total = resolutions.len() as u32;
        let cached = resolutions.iter().filter(|r| r.is_cached()).count() as u32;
        let new_articles = total - cached;
        let status = if new_articles > 0 {
            JobStatus::InProgress
        } else {
            JobStatus::Completed
        };

        let job = self
            .store
            .create_job(NewJob {
                id: job_id,
                status,
                total_articles: total,
                new_articles,
                cached_articles: cached,
                completed_count: cached,
                article_ids: resolutions
                    .iter()
                    .map(|r| r.article.id.clone())
                    .collect(),
            })
            .await?;

        for resolution in &resolutions {
            if let Disposition::Scheduled(item) = &resolution.disposition {
                self.queue.push_tail(item.band(), item).await?;
            }
        }

        if let Err(e) = self.bus.publish(&JobUpdate::for_job(&job)).await {
            tracing::warn!(error = %e, job_id = %job.id, "Failed to publish submission event");
        }

        Ok(job)
    }

    /// Cancel a job: mark it CANCELLED, drain its queued items and publish a
    /// final event. Returns the cancelled job and the number of items
    /// removed from the queues.
    pub async fn cancel(&self, job_id: &str) -> Result<(Job, u64), AppError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job not found: {job_id}")))?;

        if job.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Cannot cancel job with status {}",
                job.status
            )));
        }

        // Status first: in-flight workers observe the cancellation and drop
        // their items; a lost race to another terminal write is a conflict.
        if !self
            .store
            .set_job_status(job_id, JobStatus::Cancelled)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "Job {job_id} reached a terminal state concurrently"
            )));
        }

        let removed = self.queue.drain_job(job_id).await?;

        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job not found: {job_id}")))?;

        if let Err(e) = self.bus.publish(&JobUpdate::for_job(&job)).await {
            tracing::warn!(error = %e, job_id = %job.id, "Failed to publish cancellation event");
        }

        Ok((job, removed))
    }
}
