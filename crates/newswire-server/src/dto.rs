use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use newswire_core::article::{Article, ArticleDescriptor};
use newswire_core::job::Job;

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

fn default_priority() -> u8 {
    1
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ArticleEntry {
    pub url: String,
    pub source: String,
    pub category: String,
    /// 1-10, lower is more urgent.
    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl From<ArticleEntry> for ArticleDescriptor {
    fn from(entry: ArticleEntry) -> Self {
        ArticleDescriptor {
            url: entry.url,
            source: entry.source,
            category: entry.category,
            priority: entry.priority,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubmitRequest {
    pub articles: Vec<ArticleEntry>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
    pub total_articles: u32,
    pub new_articles: u32,
    pub cached_articles: u32,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Status and listing
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub total_articles: u32,
    pub completed: u32,
    pub failed: u32,
    pub pending: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status.to_string(),
            total_articles: job.total_articles,
            completed: job.completed_count,
            failed: job.failed_count,
            pending: job.pending_count(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    pub status_filter: Option<String>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ArticleResult {
    pub article_id: String,
    pub url: String,
    pub source: String,
    pub category: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    /// True when the content predates this job (served from the cache).
    pub cached: bool,
}

impl ArticleResult {
    pub fn from_article(article: Article, job_created_at: DateTime<Utc>) -> Self {
        let cached = article
            .scraped_at
            .is_some_and(|scraped_at| scraped_at < job_created_at);
        Self {
            article_id: article.id,
            url: article.url,
            source: article.source,
            category: article.category,
            title: article.title,
            content: article.content,
            scraped_at: article.scraped_at,
            cached,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FailedArticle {
    pub url: String,
    pub error: String,
    pub attempted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResultsResponse {
    pub job_id: String,
    pub status: String,
    pub total_articles: u32,
    pub successful: u32,
    pub failed: u32,
    pub results: Vec<ArticleResult>,
    pub failed_articles: Vec<FailedArticle>,
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: String,
    pub removed_tasks: u64,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Health and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
