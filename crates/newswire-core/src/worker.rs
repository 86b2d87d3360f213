use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::article::{ArticlePatch, ArticleStatus};
use crate::error::AppError;
use crate::event::JobUpdate;
use crate::job::{Job, JobStatus};
use crate::queue::{Band, WorkItem, WorkQueue};
use crate::retry::RetryPolicy;
use crate::store::Store;
use crate::traits::{ScrapedContent, Scraper, UpdatePublisher};

/// Why a popped item was abandoned without a terminal article transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The job row no longer resolves.
    JobMissing,
    /// The job was cancelled while the item was queued or in flight.
    JobCancelled,
    /// The article moved to an unexpected state under our feet.
    StaleArticle,
    /// The store stayed unavailable through the in-place retry budget.
    StoreUnavailable,
}

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    ItemClaimed {
        item: &'a WorkItem,
    },
    ItemCompleted {
        article_id: &'a str,
        /// True when the content was already scraped by a racing worker.
        cached: bool,
    },
    RetryScheduled {
        article_id: &'a str,
        attempt: u32,
        delay: Duration,
    },
    ItemFailed {
        article_id: &'a str,
        error: &'a str,
    },
    ItemDropped {
        article_id: &'a str,
        reason: DropReason,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for work");
            }
            WorkerEvent::ItemClaimed { item } => {
                tracing::info!(job_id = %item.job_id, article_id = %item.article_id, url = %item.url, "Work item claimed");
            }
            WorkerEvent::ItemCompleted { article_id, cached } => {
                tracing::info!(%article_id, %cached, "Article scraped");
            }
            WorkerEvent::RetryScheduled {
                article_id,
                attempt,
                delay,
            } => {
                tracing::warn!(%article_id, %attempt, delay_ms = delay.as_millis() as u64, "Scrape failed, retry scheduled");
            }
            WorkerEvent::ItemFailed { article_id, error } => {
                tracing::error!(%article_id, %error, "Article failed permanently");
            }
            WorkerEvent::ItemDropped { article_id, reason } => {
                tracing::info!(%article_id, ?reason, "Work item dropped");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Blocking-pop timeout; also how often shutdown is observed when idle.
    pub poll_timeout: Duration,
    /// Deadline for a single scrape call.
    pub scrape_timeout: Duration,
    pub retry: RetryPolicy,
    /// In-place attempts for transient store errors.
    pub store_attempts: u32,
    pub store_retry_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            poll_timeout: Duration::from_secs(1),
            scrape_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            store_attempts: 3,
            store_retry_delay: Duration::from_millis(100),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_scrape_timeout(mut self, timeout: Duration) -> Self {
        self.scrape_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Worker loop: lease items from the queue, scrape, persist, publish,
/// schedule retries. Many workers run in parallel; they coordinate only
/// through the store and the queue.
pub struct Worker<S, Q, B, F>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
    F: Scraper,
{
    store: S,
    queue: Q,
    bus: B,
    scraper: F,
    config: WorkerConfig,
}

impl<S, Q, B, F> Worker<S, Q, B, F>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
    F: Scraper,
{
    pub fn new(store: S, queue: Q, bus: B, scraper: F, config: WorkerConfig) -> Self {
        Self {
            store,
            queue,
            bus,
            scraper,
            config,
        }
    }

    /// Run the worker loop until cancellation. The blocking pop wakes up at
    /// least every `poll_timeout`, so a requested shutdown is observed
    /// promptly even on an idle queue.
    pub async fn run<R: WorkerReporter>(&self, cancel: CancellationToken, reporter: &R) {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);

            match self.queue.pop(self.config.poll_timeout).await {
                Ok(Some(item)) => {
                    reporter.report(WorkerEvent::ItemClaimed { item: &item });
                    self.process_item(&item, reporter, &cancel).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to poll the work queue");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_timeout) => {}
                        () = cancel.cancelled() => break,
                    }
                }
            }
        }

        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });
    }

    /// Process a single leased item. Public for testing purposes.
    pub async fn process_item<R: WorkerReporter>(
        &self,
        item: &WorkItem,
        reporter: &R,
        cancel: &CancellationToken,
    ) {
        // Job gate: items of cancelled or vanished jobs are abandoned.
        let job = match self
            .with_store_retry(|| self.store.get_job(&item.job_id))
            .await
        {
            Ok(Some(job)) => job,
            Ok(None) => {
                reporter.report(WorkerEvent::ItemDropped {
                    article_id: &item.article_id,
                    reason: DropReason::JobMissing,
                });
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, job_id = %item.job_id, "Store unavailable while loading job");
                reporter.report(WorkerEvent::ItemDropped {
                    article_id: &item.article_id,
                    reason: DropReason::StoreUnavailable,
                });
                return;
            }
        };
        if job.status == JobStatus::Cancelled {
            reporter.report(WorkerEvent::ItemDropped {
                article_id: &item.article_id,
                reason: DropReason::JobCancelled,
            });
            return;
        }

        // Claim the article. Retries arrive still marked SCRAPING when a
        // reset was raced, so both source states are acceptable.
        let claim = ArticlePatch::status(ArticleStatus::Scraping)
            .require(&[ArticleStatus::Pending, ArticleStatus::Scraping]);
        match self
            .with_store_retry(|| self.store.update_article(&item.article_id, claim.clone()))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Lost the claim. If another job's worker already scraped
                // this URL, the cached content settles our item too.
                match self.store.get_article(&item.article_id).await {
                    Ok(Some(article)) if article.status == ArticleStatus::Scraped => {
                        if self
                            .record_progress(item, ArticleStatus::Scraped)
                            .await
                            .is_some()
                        {
                            reporter.report(WorkerEvent::ItemCompleted {
                                article_id: &item.article_id,
                                cached: true,
                            });
                        }
                    }
                    _ => {
                        reporter.report(WorkerEvent::ItemDropped {
                            article_id: &item.article_id,
                            reason: DropReason::StaleArticle,
                        });
                    }
                }
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, article_id = %item.article_id, "Store unavailable while claiming article");
                reporter.report(WorkerEvent::ItemDropped {
                    article_id: &item.article_id,
                    reason: DropReason::StoreUnavailable,
                });
                return;
            }
        }

        let outcome = match tokio::time::timeout(
            self.config.scrape_timeout,
            self.scraper.scrape(&item.url),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.config.scrape_timeout.as_secs())),
        };

        match outcome {
            Ok(content) => self.handle_success(item, content, reporter).await,
            Err(error) => self.handle_failure(item, &error, reporter, cancel).await,
        }
    }

    async fn handle_success<R: WorkerReporter>(
        &self,
        item: &WorkItem,
        content: ScrapedContent,
        reporter: &R,
    ) {
        let patch = ArticlePatch::scraped(content.title, content.content, Utc::now())
            .require(&[ArticleStatus::Scraping]);
        match self
            .with_store_retry(|| self.store.update_article(&item.article_id, patch.clone()))
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                reporter.report(WorkerEvent::ItemDropped {
                    article_id: &item.article_id,
                    reason: DropReason::StaleArticle,
                });
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, article_id = %item.article_id, "Store unavailable while saving content");
                reporter.report(WorkerEvent::ItemDropped {
                    article_id: &item.article_id,
                    reason: DropReason::StoreUnavailable,
                });
                return;
            }
        }

        if self
            .record_progress(item, ArticleStatus::Scraped)
            .await
            .is_some()
        {
            reporter.report(WorkerEvent::ItemCompleted {
                article_id: &item.article_id,
                cached: false,
            });
        }
    }

    async fn handle_failure<R: WorkerReporter>(
        &self,
        item: &WorkItem,
        error: &AppError,
        reporter: &R,
        cancel: &CancellationToken,
    ) {
        let retries = match self
            .with_store_retry(|| self.store.increment_retry(&item.article_id))
            .await
        {
            Ok(Some(retries)) => retries,
            Ok(None) => {
                reporter.report(WorkerEvent::ItemDropped {
                    article_id: &item.article_id,
                    reason: DropReason::StaleArticle,
                });
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, article_id = %item.article_id, "Store unavailable while recording failure");
                reporter.report(WorkerEvent::ItemDropped {
                    article_id: &item.article_id,
                    reason: DropReason::StoreUnavailable,
                });
                return;
            }
        };

        if !self.config.retry.exhausted(retries) {
            let delay = self.config.retry.delay_for(retries);
            reporter.report(WorkerEvent::RetryScheduled {
                article_id: &item.article_id,
                attempt: retries,
                delay,
            });

            // Sleep out the backoff, then requeue at the head of `high` so
            // the retry is picked up next. A shutdown request skips the wait
            // but still requeues, keeping at-least-once intact.
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {}
            }

            let reset = ArticlePatch::reset_pending().require(&[ArticleStatus::Scraping]);
            match self
                .with_store_retry(|| self.store.update_article(&item.article_id, reset.clone()))
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    reporter.report(WorkerEvent::ItemDropped {
                        article_id: &item.article_id,
                        reason: DropReason::StaleArticle,
                    });
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, article_id = %item.article_id, "Store unavailable while resetting for retry");
                    reporter.report(WorkerEvent::ItemDropped {
                        article_id: &item.article_id,
                        reason: DropReason::StoreUnavailable,
                    });
                    return;
                }
            }

            let requeued = item.with_attempt(retries);
            if let Err(e) = self.queue.push_head(Band::High, &requeued).await {
                tracing::error!(error = %e, article_id = %item.article_id, "Failed to requeue retry");
            }
        } else {
            let message = error.to_string();
            let patch =
                ArticlePatch::failed(message.clone()).require(&[ArticleStatus::Scraping]);
            match self
                .with_store_retry(|| self.store.update_article(&item.article_id, patch.clone()))
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    reporter.report(WorkerEvent::ItemDropped {
                        article_id: &item.article_id,
                        reason: DropReason::StaleArticle,
                    });
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, article_id = %item.article_id, "Store unavailable while marking failure");
                    reporter.report(WorkerEvent::ItemDropped {
                        article_id: &item.article_id,
                        reason: DropReason::StoreUnavailable,
                    });
                    return;
                }
            }

            if self
                .record_progress(item, ArticleStatus::Failed)
                .await
                .is_some()
            {
                reporter.report(WorkerEvent::ItemFailed {
                    article_id: &item.article_id,
                    error: &message,
                });
            }
        }
    }

    /// Bump the job counters for one settled article, publish the progress
    /// event (unless the job was cancelled meanwhile) and finalize the job
    /// when every article is accounted for.
    async fn record_progress(&self, item: &WorkItem, status: ArticleStatus) -> Option<Job> {
        let (completed, failed) = match status {
            ArticleStatus::Scraped => (1, 0),
            _ => (0, 1),
        };

        let job = match self
            .with_store_retry(|| self.store.add_job_progress(&item.job_id, completed, failed))
            .await
        {
            Ok(Some(job)) => job,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(error = %e, job_id = %item.job_id, "Store unavailable while updating job counters");
                return None;
            }
        };

        if job.status != JobStatus::Cancelled {
            let update = JobUpdate::for_article(&job, &item.article_id, status);
            if let Err(e) = self.bus.publish(&update).await {
                tracing::warn!(error = %e, job_id = %job.id, "Failed to publish progress event");
            }
        }

        self.finalize(&job).await;
        Some(job)
    }

    async fn finalize(&self, job: &Job) {
        if job.status.is_terminal() || !job.is_settled() {
            return;
        }
        let status = job.settled_status();
        if let Err(e) = self
            .with_store_retry(|| self.store.set_job_status(&job.id, status))
            .await
        {
            tracing::error!(error = %e, job_id = %job.id, "Failed to finalize job");
        }
    }

    /// Retry a store call in place while the error stays transient.
    async fn with_store_retry<T, Op, Fut>(&self, op: Op) -> Result<T, AppError>
    where
        Op: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.store_attempts => {
                    tracing::warn!(error = %e, %attempt, "Transient store error, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.store_retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::ArticleDescriptor;
    use crate::job::NewJob;
    use crate::service::JobService;
    use crate::testutil::{MemoryBus, MemoryQueue, MemoryStore, MockReporter, MockScraper, descriptor};
    use crate::util;

    fn test_config() -> WorkerConfig {
        WorkerConfig::default()
            .with_worker_id("test-worker")
            .with_poll_timeout(Duration::from_millis(10))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            })
    }

    fn worker(
        store: MemoryStore,
        queue: MemoryQueue,
        bus: MemoryBus,
        scraper: MockScraper,
    ) -> Worker<MemoryStore, MemoryQueue, MemoryBus, MockScraper> {
        Worker::new(store, queue, bus, scraper, test_config())
    }

    /// Submit a batch and return the job plus the first queued item.
    async fn submit_one(
        store: &MemoryStore,
        queue: &MemoryQueue,
        bus: &MemoryBus,
        descriptors: &[ArticleDescriptor],
    ) -> (crate::job::Job, WorkItem) {
        let service = JobService::new(store.clone(), queue.clone(), bus.clone());
        let job = service.submit(descriptors).await.unwrap();
        let item = queue
            .pop(Duration::from_millis(10))
            .await
            .unwrap()
            .expect("expected a queued item");
        (job, item)
    }

    #[tokio::test]
    async fn successful_scrape_completes_article_and_job() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let (job, item) = submit_one(
            &store,
            &queue,
            &bus,
            &[descriptor("https://example.com/a", 1)],
        )
        .await;

        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();
        worker(store.clone(), queue.clone(), bus.clone(), MockScraper::ok())
            .process_item(&item, &reporter, &cancel)
            .await;

        let article = store.get_article(&item.article_id).await.unwrap().unwrap();
        assert_eq!(article.status, ArticleStatus::Scraped);
        assert!(article.title.is_some());
        assert!(article.content.is_some());
        assert!(article.scraped_at.is_some());
        assert_eq!(article.retry_count, 0);

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_count, 1);
        assert_eq!(job.failed_count, 0);
        assert!(job.completed_at.is_some());

        let events = reporter.events();
        assert!(events.contains(&"ItemCompleted".to_string()));

        // One submission event plus one scraped event.
        let published = bus.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].status, "scraped");
        assert_eq!(published[1].completed, 1);
    }

    #[tokio::test]
    async fn failure_requeues_on_high_with_backoff() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let (_job, item) = submit_one(
            &store,
            &queue,
            &bus,
            &[descriptor("https://example.com/low", 10)],
        )
        .await;
        assert_eq!(item.band(), Band::Low);

        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();
        worker(
            store.clone(),
            queue.clone(),
            bus.clone(),
            MockScraper::failing(),
        )
        .process_item(&item, &reporter, &cancel)
        .await;

        // Retry promoted to high regardless of the original priority.
        assert_eq!(queue.band_depth(Band::High), 1);
        let retried = queue
            .pop(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.article_id, item.article_id);

        let article = store.get_article(&item.article_id).await.unwrap().unwrap();
        assert_eq!(article.status, ArticleStatus::Pending);
        assert_eq!(article.retry_count, 1);

        assert!(reporter.events().contains(&"RetryScheduled".to_string()));
    }

    #[tokio::test]
    async fn retry_exhaustion_fails_article_and_settles_job() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let (job, first) = submit_one(
            &store,
            &queue,
            &bus,
            &[descriptor("https://example.com/z", 1)],
        )
        .await;

        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();
        let w = worker(
            store.clone(),
            queue.clone(),
            bus.clone(),
            MockScraper::failing(),
        );

        // Drive the item through every retry until exhaustion.
        let mut item = first;
        for _ in 0..3 {
            w.process_item(&item, &reporter, &cancel).await;
            match queue.pop(Duration::from_millis(10)).await.unwrap() {
                Some(next) => item = next,
                None => break,
            }
        }

        let article = store.get_article(&item.article_id).await.unwrap().unwrap();
        assert_eq!(article.status, ArticleStatus::Failed);
        assert_eq!(article.retry_count, 3);
        assert!(article.error_message.is_some());

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.failed_count, 1);
        assert_eq!(job.completed_count, 0);
        // Every article failed, so the job ends FAILED.
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(queue.depth().await.unwrap(), 0);

        assert!(reporter.events().contains(&"ItemFailed".to_string()));
    }

    #[tokio::test]
    async fn mixed_outcome_job_completes() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let service = JobService::new(store.clone(), queue.clone(), bus.clone());
        let job = service
            .submit(&[
                descriptor("https://example.com/good", 1),
                descriptor("https://example.com/bad", 1),
            ])
            .await
            .unwrap();

        let scraper = MockScraper::ok().always_failing_for("https://example.com/bad");
        let w = worker(store.clone(), queue.clone(), bus.clone(), scraper);
        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();

        while let Some(item) = queue.pop(Duration::from_millis(10)).await.unwrap() {
            w.process_item(&item, &reporter, &cancel).await;
        }

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.completed_count, 1);
        assert_eq!(job.failed_count, 1);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn cancelled_job_items_are_dropped_silently() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let (job, item) = submit_one(
            &store,
            &queue,
            &bus,
            &[descriptor("https://example.com/a", 1)],
        )
        .await;

        store
            .set_job_status(&job.id, JobStatus::Cancelled)
            .await
            .unwrap();
        let published_before = bus.published().len();

        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();
        worker(store.clone(), queue.clone(), bus.clone(), MockScraper::ok())
            .process_item(&item, &reporter, &cancel)
            .await;

        // Article untouched, nothing published, drop recorded.
        let article = store.get_article(&item.article_id).await.unwrap().unwrap();
        assert_eq!(article.status, ArticleStatus::Pending);
        assert_eq!(bus.published().len(), published_before);
        assert_eq!(reporter.drops(), vec![DropReason::JobCancelled]);
    }

    #[tokio::test]
    async fn missing_job_drops_item() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let item = WorkItem {
            job_id: "job_gone".into(),
            article_id: "art_gone".into(),
            url: "https://example.com/a".into(),
            priority: 1,
            attempt: 0,
        };

        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();
        worker(store, queue, bus, MockScraper::ok())
            .process_item(&item, &reporter, &cancel)
            .await;

        assert_eq!(reporter.drops(), vec![DropReason::JobMissing]);
    }

    #[tokio::test]
    async fn raced_scraped_article_counts_as_cached_success() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let (job, item) = submit_one(
            &store,
            &queue,
            &bus,
            &[descriptor("https://example.com/a", 1)],
        )
        .await;

        // Another worker finished the article before we claimed it.
        store
            .update_article(
                &item.article_id,
                ArticlePatch::scraped("Title".into(), "Body".into(), Utc::now()),
            )
            .await
            .unwrap();

        let scraper = MockScraper::ok();
        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();
        worker(store.clone(), queue.clone(), bus.clone(), scraper.clone())
            .process_item(&item, &reporter, &cancel)
            .await;

        // No scrape happened, but the job still completed.
        assert_eq!(scraper.calls(), Vec::<String>::new());
        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.completed_count, 1);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(reporter.events().contains(&"ItemCompletedCached".to_string()));
    }

    #[tokio::test]
    async fn transient_store_errors_are_retried_in_place() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let (job, item) = submit_one(
            &store,
            &queue,
            &bus,
            &[descriptor("https://example.com/a", 1)],
        )
        .await;

        // First two store calls fail; the third succeeds.
        store.inject_transient(2);

        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();
        worker(store.clone(), queue.clone(), bus.clone(), MockScraper::ok())
            .process_item(&item, &reporter, &cancel)
            .await;

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.completed_count, 1);
    }

    #[tokio::test]
    async fn counter_updates_from_many_workers_are_not_lost() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let service = JobService::new(store.clone(), queue.clone(), bus.clone());
        let batch: Vec<_> = (0..8)
            .map(|i| descriptor(&format!("https://example.com/{i}"), 5))
            .collect();
        let job = service.submit(&batch).await.unwrap();

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let w = worker(store.clone(), queue.clone(), bus.clone(), MockScraper::ok());
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let reporter = MockReporter::new();
                while let Ok(Some(item)) = w.queue.pop(Duration::from_millis(20)).await {
                    w.process_item(&item, &reporter, &cancel).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.completed_count, 8);
        assert_eq!(job.failed_count, 0);
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn run_loop_observes_shutdown_on_idle_queue() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let w = worker(store, queue, bus, MockScraper::ok());
        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();

        cancel.cancel();
        w.run(cancel, &reporter).await;

        let events = reporter.events();
        assert!(events.contains(&"Started".to_string()));
        assert!(events.contains(&"Stopped".to_string()));
    }

    #[tokio::test]
    async fn run_loop_processes_then_stops() {
        let (store, queue, bus) = (MemoryStore::new(), MemoryQueue::new(), MemoryBus::new());
        let service = JobService::new(store.clone(), queue.clone(), bus.clone());
        let job = service
            .submit(&[descriptor("https://example.com/a", 1)])
            .await
            .unwrap();

        let w = worker(store.clone(), queue.clone(), bus.clone(), MockScraper::ok());
        let reporter = MockReporter::new();
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        w.run(cancel, &reporter).await;

        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(reporter.events().contains(&"Stopped".to_string()));
    }

    #[tokio::test]
    async fn finalize_never_overrides_cancellation() {
        let store = MemoryStore::new();
        let job = store
            .create_job(NewJob {
                id: util::job_id(),
                status: JobStatus::Cancelled,
                total_articles: 1,
                new_articles: 1,
                cached_articles: 0,
                completed_count: 1,
                article_ids: vec![],
            })
            .await
            .unwrap();

        // A settled but cancelled job must stay cancelled.
        assert!(!store
            .set_job_status(&job.id, JobStatus::Completed)
            .await
            .unwrap());
        let job = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }
}
