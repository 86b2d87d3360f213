use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate state of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// A client-submitted batch of articles and its aggregate progress.
///
/// `cached_articles + new_articles = total_articles` is fixed at creation.
/// `completed_count`/`failed_count` only ever grow, and the job turns
/// terminal exactly when their sum reaches `total_articles` (or on
/// cancellation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub total_articles: u32,
    pub new_articles: u32,
    pub cached_articles: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub article_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Articles not yet in a terminal state.
    pub fn pending_count(&self) -> u32 {
        self.total_articles
            .saturating_sub(self.completed_count + self.failed_count)
    }

    /// True once every article has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.completed_count + self.failed_count >= self.total_articles
    }

    /// Terminal status a settled job should take: FAILED only when every
    /// article failed, COMPLETED otherwise (including mixed outcomes).
    pub fn settled_status(&self) -> JobStatus {
        if self.failed_count > 0 && self.completed_count == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }
}

/// Fields for creating a job record. The id is generated by the submitter so
/// queued work items can reference the job before the row returns.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub status: JobStatus,
    pub total_articles: u32,
    pub new_articles: u32,
    pub cached_articles: u32,
    /// Cached articles count as already completed.
    pub completed_count: u32,
    pub article_ids: Vec<String>,
}
