use std::future::Future;

use crate::article::{Article, ArticleDescriptor, ArticlePatch};
use crate::error::AppError;
use crate::job::{Job, JobStatus, NewJob};

/// Persistence for jobs and articles.
///
/// This is the only place read-modify-write happens; every primitive is
/// atomic on its own so concurrent workers coordinate purely through it.
/// No retries happen inside the store; errors surface to callers, which
/// decide whether they are worth retrying via [`AppError::is_transient`].
pub trait Store: Send + Sync + Clone {
    fn create_job(&self, new_job: NewJob) -> impl Future<Output = Result<Job, AppError>> + Send;

    fn get_job(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Newest first, optionally filtered by status.
    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        skip: usize,
    ) -> impl Future<Output = Result<Vec<Job>, AppError>> + Send;

    /// Atomically add to the progress counters and return the updated job.
    /// Concurrent workers must never lose increments.
    fn add_job_progress(
        &self,
        job_id: &str,
        completed: u32,
        failed: u32,
    ) -> impl Future<Output = Result<Option<Job>, AppError>> + Send;

    /// Move a job to `status`, stamping `completed_at` when it is terminal.
    /// Refuses (returns false) if the job is already terminal, so a
    /// cancellation can never be overwritten by a late completion.
    fn set_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Insert a pending article for the descriptor's URL, or return the
    /// existing one. Atomic on `url`: with N concurrent callers exactly one
    /// observes `existed == false`.
    fn upsert_article_pending(
        &self,
        descriptor: &ArticleDescriptor,
    ) -> impl Future<Output = Result<(Article, bool), AppError>> + Send;

    fn get_article(
        &self,
        article_id: &str,
    ) -> impl Future<Output = Result<Option<Article>, AppError>> + Send;

    fn get_article_by_url(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Option<Article>, AppError>> + Send;

    fn get_articles(
        &self,
        article_ids: &[String],
    ) -> impl Future<Output = Result<Vec<Article>, AppError>> + Send;

    /// Apply a patch, honoring its status precondition. Returns the updated
    /// article, or `None` when the article is missing or the precondition
    /// did not hold.
    fn update_article(
        &self,
        article_id: &str,
        patch: ArticlePatch,
    ) -> impl Future<Output = Result<Option<Article>, AppError>> + Send;

    fn increment_reference(
        &self,
        article_id: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Atomically bump `retry_count`, returning the new value.
    fn increment_retry(
        &self,
        article_id: &str,
    ) -> impl Future<Output = Result<Option<u32>, AppError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}
