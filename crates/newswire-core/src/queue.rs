use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Key prefix for the backing queue lists, e.g. `scrape_tasks:high`.
pub const QUEUE_PREFIX: &str = "scrape_tasks";

/// Priority band a work item is queued under.
///
/// Priorities 1-3 map to `high`, 4-7 to `medium`, 8-10 to `low`. Retries are
/// always requeued on `high` regardless of the original priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    High,
    Medium,
    Low,
}

impl Band {
    /// Pop order: high is fully drained before medium is considered.
    pub const ALL: [Band; 3] = [Band::High, Band::Medium, Band::Low];

    pub fn for_priority(priority: u8) -> Self {
        match priority {
            0..=3 => Band::High,
            4..=7 => Band::Medium,
            _ => Band::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::High => "high",
            Band::Medium => "medium",
            Band::Low => "low",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Band::High => 0,
            Band::Medium => 1,
            Band::Low => 2,
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transient queue payload pointing at one article within one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: String,
    pub article_id: String,
    pub url: String,
    pub priority: u8,
    /// 0-based attempt counter; incremented on each retry requeue.
    #[serde(default)]
    pub attempt: u32,
}

impl WorkItem {
    pub fn band(&self) -> Band {
        Band::for_priority(self.priority)
    }

    pub fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }
}

/// Three named FIFO queues with a strict-priority atomic pop.
///
/// Implementations must make `pop` a single server-side operation across all
/// bands; independent per-band polling races and breaks the priority
/// ordering under load.
pub trait WorkQueue: Send + Sync + Clone {
    /// Standard FIFO enqueue.
    fn push_tail(
        &self,
        band: Band,
        item: &WorkItem,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Insert at the pop end so the item is taken next. Used for retries.
    fn push_head(
        &self,
        band: Band,
        item: &WorkItem,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Take the next item in band-priority order, blocking up to `timeout`.
    /// Returns `None` when every band stayed empty for the full wait.
    fn pop(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<WorkItem>, AppError>> + Send;

    /// Remove every queued item belonging to a job. Returns the count removed.
    fn drain_job(&self, job_id: &str) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Total number of queued items across all bands.
    fn depth(&self) -> impl Future<Output = Result<u64, AppError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_mapping() {
        assert_eq!(Band::for_priority(1), Band::High);
        assert_eq!(Band::for_priority(3), Band::High);
        assert_eq!(Band::for_priority(4), Band::Medium);
        assert_eq!(Band::for_priority(7), Band::Medium);
        assert_eq!(Band::for_priority(8), Band::Low);
        assert_eq!(Band::for_priority(10), Band::Low);
    }

    #[test]
    fn band_order_is_high_first() {
        assert_eq!(Band::ALL[0], Band::High);
        assert_eq!(Band::ALL[2], Band::Low);
        assert_eq!(Band::High.index(), 0);
    }

    #[test]
    fn work_item_roundtrip() {
        let item = WorkItem {
            job_id: "job_1".into(),
            article_id: "art_1".into(),
            url: "https://example.com/a".into(),
            priority: 2,
            attempt: 1,
        };
        let json = serde_json::to_string(&item).unwrap();
        let parsed: WorkItem = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, item);
        assert_eq!(parsed.band(), Band::High);
    }

    #[test]
    fn attempt_defaults_to_zero() {
        let parsed: WorkItem = serde_json::from_str(
            r#"{"job_id":"job_1","article_id":"art_1","url":"https://e.com","priority":5}"#,
        )
        .unwrap();
        assert_eq!(parsed.attempt, 0);
        assert_eq!(parsed.band(), Band::Medium);
    }
}
