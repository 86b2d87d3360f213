use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::util;

/// Highest priority a caller may assign (most urgent is 1).
pub const MIN_PRIORITY: u8 = 1;
/// Lowest priority a caller may assign.
pub const MAX_PRIORITY: u8 = 10;

/// Fetch state of a single article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Pending,
    Scraping,
    Scraped,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Pending => "pending",
            ArticleStatus::Scraping => "scraping",
            ArticleStatus::Scraped => "scraped",
            ArticleStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ArticleStatus::Scraped | ArticleStatus::Failed)
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ArticleStatus::Pending),
            "scraping" => Ok(ArticleStatus::Scraping),
            "scraped" => Ok(ArticleStatus::Scraped),
            "failed" => Ok(ArticleStatus::Failed),
            _ => Err(format!("Unknown article status: {}", s)),
        }
    }
}

/// An article record: fetch state plus, once scraped, the extracted content.
///
/// Articles are globally unique by normalized `url` and are never deleted;
/// they double as the dedup cache for subsequent jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub url: String,
    pub source: String,
    pub category: String,
    pub priority: u8,
    pub title: Option<String>,
    pub content: Option<String>,
    pub status: ArticleStatus,
    pub error_message: Option<String>,
    pub scraped_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of jobs that have referenced this article. Monotonic.
    pub reference_count: u32,
    /// Attempts made in the current non-terminal lifecycle.
    pub retry_count: u32,
}

/// One article requested by a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleDescriptor {
    pub url: String,
    pub source: String,
    pub category: String,
    pub priority: u8,
}

impl ArticleDescriptor {
    pub fn validate(&self) -> Result<(), AppError> {
        if !util::validate_url(&self.url) {
            return Err(AppError::Validation(format!(
                "Invalid URL: {}",
                self.url
            )));
        }
        if self.source.trim().is_empty() {
            return Err(AppError::Validation("source must not be empty".into()));
        }
        if self.category.trim().is_empty() {
            return Err(AppError::Validation("category must not be empty".into()));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(AppError::Validation(format!(
                "Priority {} out of range {}..={}",
                self.priority, MIN_PRIORITY, MAX_PRIORITY
            )));
        }
        Ok(())
    }

    /// Copy of this descriptor with the URL normalized for dedup lookup.
    pub fn normalized(&self) -> Self {
        Self {
            url: util::normalize_url(&self.url),
            source: self.source.clone(),
            category: self.category.clone(),
            priority: self.priority,
        }
    }
}

/// Partial update applied to an article, optionally guarded by a status
/// precondition so concurrent transitions never clobber each other.
#[derive(Debug, Clone, Default)]
pub struct ArticlePatch {
    pub status: Option<ArticleStatus>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub error_message: Option<String>,
    pub clear_error: bool,
    pub scraped_at: Option<DateTime<Utc>>,
    pub reset_retries: bool,
    /// When non-empty, the update only applies if the current status is one
    /// of these; otherwise the store leaves the row untouched and reports it.
    pub require_status: Vec<ArticleStatus>,
}

impl ArticlePatch {
    pub fn status(status: ArticleStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Successful scrape: content set, error cleared, retry budget reset.
    pub fn scraped(title: String, content: String, scraped_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ArticleStatus::Scraped),
            title: Some(title),
            content: Some(content),
            scraped_at: Some(scraped_at),
            clear_error: true,
            reset_retries: true,
            ..Default::default()
        }
    }

    /// Permanent failure after the retry budget is exhausted.
    pub fn failed(error: String) -> Self {
        Self {
            status: Some(ArticleStatus::Failed),
            error_message: Some(error),
            ..Default::default()
        }
    }

    /// Back to the pending state so the article can be rescheduled.
    pub fn reset_pending() -> Self {
        Self {
            status: Some(ArticleStatus::Pending),
            clear_error: true,
            ..Default::default()
        }
    }

    /// Fresh lifecycle for a resubmitted failed article.
    pub fn reset_for_resubmit() -> Self {
        Self {
            status: Some(ArticleStatus::Pending),
            clear_error: true,
            reset_retries: true,
            ..Default::default()
        }
    }

    pub fn require(mut self, statuses: &[ArticleStatus]) -> Self {
        self.require_status = statuses.to_vec();
        self
    }
}
