//! Test utilities: in-memory implementations of the core traits.
//!
//! Handwritten fakes for dependency injection in unit tests, in-process
//! integration tests and the server's black-box tests. The queue and bus are
//! complete single-process implementations of their contracts, not stubs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Notify};

use crate::article::{Article, ArticleDescriptor, ArticlePatch, ArticleStatus};
use crate::error::AppError;
use crate::event::JobUpdate;
use crate::job::{Job, JobStatus, NewJob};
use crate::queue::{Band, WorkItem, WorkQueue};
use crate::store::Store;
use crate::traits::{ScrapedContent, Scraper, UpdatePublisher};
use crate::util;
use crate::worker::{DropReason, WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`Store`] with the same atomicity guarantees as the Postgres
/// implementation (every primitive runs under one lock acquisition).
#[derive(Clone, Default)]
pub struct MemoryStore {
    jobs: Arc<Mutex<HashMap<String, Job>>>,
    articles: Arc<Mutex<HashMap<String, Article>>>,
    transient_failures: Arc<Mutex<u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store calls fail with a transient error.
    pub fn inject_transient(&self, count: u32) {
        *self.transient_failures.lock().unwrap() = count;
    }

    fn gate(&self) -> Result<(), AppError> {
        let mut remaining = self.transient_failures.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(AppError::Database("injected transient failure".into()));
        }
        Ok(())
    }

    /// Seed the article cache with an already scraped URL.
    pub fn seed_scraped(&self, url: &str, title: &str, content: &str) -> Article {
        let now = Utc::now();
        let article = Article {
            id: util::article_id(),
            url: util::normalize_url(url),
            source: "seed".to_string(),
            category: "seed".to_string(),
            priority: 5,
            title: Some(title.to_string()),
            content: Some(content.to_string()),
            status: ArticleStatus::Scraped,
            error_message: None,
            scraped_at: Some(now),
            created_at: now,
            updated_at: now,
            reference_count: 0,
            retry_count: 0,
        };
        self.articles
            .lock()
            .unwrap()
            .insert(article.id.clone(), article.clone());
        article
    }

    /// Seed an article that exhausted its retry budget.
    pub fn seed_failed(&self, url: &str, error: &str) -> Article {
        let now = Utc::now();
        let article = Article {
            id: util::article_id(),
            url: util::normalize_url(url),
            source: "seed".to_string(),
            category: "seed".to_string(),
            priority: 5,
            title: None,
            content: None,
            status: ArticleStatus::Failed,
            error_message: Some(error.to_string()),
            scraped_at: None,
            created_at: now,
            updated_at: now,
            reference_count: 0,
            retry_count: 3,
        };
        self.articles
            .lock()
            .unwrap()
            .insert(article.id.clone(), article.clone());
        article
    }
}

impl Store for MemoryStore {
    async fn create_job(&self, new_job: NewJob) -> Result<Job, AppError> {
        self.gate()?;
        let now = Utc::now();
        let job = Job {
            id: new_job.id,
            status: new_job.status,
            total_articles: new_job.total_articles,
            new_articles: new_job.new_articles,
            cached_articles: new_job.cached_articles,
            completed_count: new_job.completed_count,
            failed_count: 0,
            article_ids: new_job.article_ids,
            created_at: now,
            updated_at: now,
            completed_at: new_job.status.is_terminal().then_some(now),
        };
        self.jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>, AppError> {
        self.gate()?;
        Ok(self.jobs.lock().unwrap().get(job_id).cloned())
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<Job>, AppError> {
        self.gate()?;
        let jobs = self.jobs.lock().unwrap();
        let mut filtered: Vec<Job> = jobs
            .values()
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(filtered.into_iter().skip(skip).take(limit).collect())
    }

    async fn add_job_progress(
        &self,
        job_id: &str,
        completed: u32,
        failed: u32,
    ) -> Result<Option<Job>, AppError> {
        self.gate()?;
        let mut jobs = self.jobs.lock().unwrap();
        Ok(jobs.get_mut(job_id).map(|job| {
            job.completed_count += completed;
            job.failed_count += failed;
            job.updated_at = Utc::now();
            job.clone()
        }))
    }

    async fn set_job_status(&self, job_id: &str, status: JobStatus) -> Result<bool, AppError> {
        self.gate()?;
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if job.status.is_terminal() {
            return Ok(false);
        }
        let now = Utc::now();
        job.status = status;
        job.updated_at = now;
        if status.is_terminal() {
            job.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn upsert_article_pending(
        &self,
        descriptor: &ArticleDescriptor,
    ) -> Result<(Article, bool), AppError> {
        self.gate()?;
        let mut articles = self.articles.lock().unwrap();
        if let Some(existing) = articles.values().find(|a| a.url == descriptor.url) {
            return Ok((existing.clone(), true));
        }
        let now = Utc::now();
        let article = Article {
            id: util::article_id(),
            url: descriptor.url.clone(),
            source: descriptor.source.clone(),
            category: descriptor.category.clone(),
            priority: descriptor.priority,
            title: None,
            content: None,
            status: ArticleStatus::Pending,
            error_message: None,
            scraped_at: None,
            created_at: now,
            updated_at: now,
            reference_count: 0,
            retry_count: 0,
        };
        articles.insert(article.id.clone(), article.clone());
        Ok((article, false))
    }

    async fn get_article(&self, article_id: &str) -> Result<Option<Article>, AppError> {
        self.gate()?;
        Ok(self.articles.lock().unwrap().get(article_id).cloned())
    }

    async fn get_article_by_url(&self, url: &str) -> Result<Option<Article>, AppError> {
        self.gate()?;
        let normalized = util::normalize_url(url);
        Ok(self
            .articles
            .lock()
            .unwrap()
            .values()
            .find(|a| a.url == normalized)
            .cloned())
    }

    async fn get_articles(&self, article_ids: &[String]) -> Result<Vec<Article>, AppError> {
        self.gate()?;
        let articles = self.articles.lock().unwrap();
        Ok(article_ids
            .iter()
            .filter_map(|id| articles.get(id).cloned())
            .collect())
    }

    async fn update_article(
        &self,
        article_id: &str,
        patch: ArticlePatch,
    ) -> Result<Option<Article>, AppError> {
        self.gate()?;
        let mut articles = self.articles.lock().unwrap();
        let Some(article) = articles.get_mut(article_id) else {
            return Ok(None);
        };
        if !patch.require_status.is_empty() && !patch.require_status.contains(&article.status) {
            return Ok(None);
        }
        if let Some(status) = patch.status {
            article.status = status;
        }
        if let Some(title) = patch.title {
            article.title = Some(title);
        }
        if let Some(content) = patch.content {
            article.content = Some(content);
        }
        if patch.clear_error {
            article.error_message = None;
        } else if let Some(error) = patch.error_message {
            article.error_message = Some(error);
        }
        if let Some(scraped_at) = patch.scraped_at {
            article.scraped_at = Some(scraped_at);
        }
        if patch.reset_retries {
            article.retry_count = 0;
        }
        article.updated_at = Utc::now();
        Ok(Some(article.clone()))
    }

    async fn increment_reference(&self, article_id: &str) -> Result<(), AppError> {
        self.gate()?;
        if let Some(article) = self.articles.lock().unwrap().get_mut(article_id) {
            article.reference_count += 1;
            article.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_retry(&self, article_id: &str) -> Result<Option<u32>, AppError> {
        self.gate()?;
        Ok(self
            .articles
            .lock()
            .unwrap()
            .get_mut(article_id)
            .map(|article| {
                article.retry_count += 1;
                article.updated_at = Utc::now();
                article.retry_count
            }))
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.gate()
    }
}

// ---------------------------------------------------------------------------
// MemoryQueue
// ---------------------------------------------------------------------------

/// In-memory [`WorkQueue`]: three FIFO deques behind one lock, so the
/// cross-band pop is a single atomic scan in strict priority order.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    bands: Mutex<[VecDeque<WorkItem>; 3]>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items currently queued in one band.
    pub fn band_depth(&self, band: Band) -> usize {
        self.inner.bands.lock().unwrap()[band.index()].len()
    }

    fn try_pop(&self) -> Option<WorkItem> {
        let mut bands = self.inner.bands.lock().unwrap();
        for band in Band::ALL {
            if let Some(item) = bands[band.index()].pop_front() {
                return Some(item);
            }
        }
        None
    }
}

impl WorkQueue for MemoryQueue {
    async fn push_tail(&self, band: Band, item: &WorkItem) -> Result<(), AppError> {
        self.inner.bands.lock().unwrap()[band.index()].push_back(item.clone());
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn push_head(&self, band: Band, item: &WorkItem) -> Result<(), AppError> {
        self.inner.bands.lock().unwrap()[band.index()].push_front(item.clone());
        self.inner.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<WorkItem>, AppError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            if let Some(item) = self.try_pop() {
                return Ok(Some(item));
            }
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn drain_job(&self, job_id: &str) -> Result<u64, AppError> {
        let mut bands = self.inner.bands.lock().unwrap();
        let mut removed = 0u64;
        for band in bands.iter_mut() {
            let before = band.len();
            band.retain(|item| item.job_id != job_id);
            removed += (before - band.len()) as u64;
        }
        Ok(removed)
    }

    async fn depth(&self) -> Result<u64, AppError> {
        let bands = self.inner.bands.lock().unwrap();
        Ok(bands.iter().map(|band| band.len() as u64).sum())
    }
}

// ---------------------------------------------------------------------------
// MemoryBus
// ---------------------------------------------------------------------------

/// In-memory [`UpdatePublisher`] on a tokio broadcast channel. Records every
/// published update for assertions.
#[derive(Clone)]
pub struct MemoryBus {
    sender: broadcast::Sender<JobUpdate>,
    published: Arc<Mutex<Vec<JobUpdate>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to the live stream, as the broadcaster bridge does.
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.sender.subscribe()
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<JobUpdate> {
        self.published.lock().unwrap().clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdatePublisher for MemoryBus {
    async fn publish(&self, update: &JobUpdate) -> Result<(), AppError> {
        self.published.lock().unwrap().push(update.clone());
        // No receivers is fine; delivery is best-effort.
        let _ = self.sender.send(update.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockScraper
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum DefaultOutcome {
    Succeed,
    Fail,
}

/// Mock scraper with per-URL scripted outcomes and a configurable default.
#[derive(Clone)]
pub struct MockScraper {
    scripted: Arc<Mutex<HashMap<String, VecDeque<Result<ScrapedContent, AppError>>>>>,
    always_fail: Arc<Mutex<Vec<String>>>,
    default_outcome: DefaultOutcome,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockScraper {
    /// Every scrape succeeds with content derived from the URL.
    pub fn ok() -> Self {
        Self {
            scripted: Arc::new(Mutex::new(HashMap::new())),
            always_fail: Arc::new(Mutex::new(Vec::new())),
            default_outcome: DefaultOutcome::Succeed,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every scrape fails.
    pub fn failing() -> Self {
        Self {
            default_outcome: DefaultOutcome::Fail,
            ..Self::ok()
        }
    }

    /// Queue explicit outcomes for one URL; consumed in order, after which
    /// the default applies again.
    pub fn script(
        self,
        url: &str,
        outcomes: Vec<Result<ScrapedContent, AppError>>,
    ) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(url.to_string(), outcomes.into());
        self
    }

    /// Make one URL fail on every attempt.
    pub fn always_failing_for(self, url: &str) -> Self {
        self.always_fail.lock().unwrap().push(url.to_string());
        self
    }

    /// URLs scraped so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Scraper for MockScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedContent, AppError> {
        self.calls.lock().unwrap().push(url.to_string());

        if let Some(outcome) = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
        {
            return outcome;
        }
        if self.always_fail.lock().unwrap().iter().any(|u| u == url) {
            return Err(AppError::Scrape(format!("scripted failure for {url}")));
        }
        match self.default_outcome {
            DefaultOutcome::Succeed => Ok(ScrapedContent {
                title: format!("Title for {url}"),
                content: format!("Content scraped from {url}"),
            }),
            DefaultOutcome::Fail => Err(AppError::Scrape("scraper always fails".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Worker reporter that records event labels and drop reasons.
#[derive(Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
    drops: Arc<Mutex<Vec<DropReason>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn drops(&self) -> Vec<DropReason> {
        self.drops.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::Polling => "Polling",
            WorkerEvent::ItemClaimed { .. } => "ItemClaimed",
            WorkerEvent::ItemCompleted { cached: false, .. } => "ItemCompleted",
            WorkerEvent::ItemCompleted { cached: true, .. } => "ItemCompletedCached",
            WorkerEvent::RetryScheduled { .. } => "RetryScheduled",
            WorkerEvent::ItemFailed { .. } => "ItemFailed",
            WorkerEvent::ItemDropped { reason, .. } => {
                self.drops.lock().unwrap().push(*reason);
                "ItemDropped"
            }
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Descriptor with default metadata for tests.
pub fn descriptor(url: &str, priority: u8) -> ArticleDescriptor {
    ArticleDescriptor {
        url: url.to_string(),
        source: "TechNews".to_string(),
        category: "AI".to_string(),
        priority,
    }
}
