use serde::{Deserialize, Serialize};

use crate::article::ArticleStatus;
use crate::job::Job;

/// Pub/sub channel carrying progress events from workers to subscribers.
pub const JOB_UPDATES_CHANNEL: &str = "job_updates";

/// Discriminator value for progress events.
pub const JOB_UPDATE_KIND: &str = "job_update";

/// Progress event published on the bus and fanned out to WebSocket clients.
///
/// `status` is the article's status after a per-article transition; for
/// submission and cancellation events `article_id` is absent and `status`
/// carries the job's status instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub job_id: String,
    pub article_id: Option<String>,
    pub status: String,
    pub completed: u32,
    pub failed: u32,
    pub total: u32,
}

impl JobUpdate {
    pub fn for_article(job: &Job, article_id: &str, status: ArticleStatus) -> Self {
        Self {
            kind: JOB_UPDATE_KIND.to_string(),
            job_id: job.id.clone(),
            article_id: Some(article_id.to_string()),
            status: status.as_str().to_string(),
            completed: job.completed_count,
            failed: job.failed_count,
            total: job.total_articles,
        }
    }

    pub fn for_job(job: &Job) -> Self {
        Self {
            kind: JOB_UPDATE_KIND.to_string(),
            job_id: job.id.clone(),
            article_id: None,
            status: job.status.as_str().to_string(),
            completed: job.completed_count,
            failed: job.failed_count,
            total: job.total_articles,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::job::JobStatus;

    fn job() -> Job {
        Job {
            id: "job_abc".into(),
            status: JobStatus::InProgress,
            total_articles: 3,
            new_articles: 2,
            cached_articles: 1,
            completed_count: 2,
            failed_count: 0,
            article_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn article_event_wire_shape() {
        let update = JobUpdate::for_article(&job(), "art_1", ArticleStatus::Scraped);
        let value: serde_json::Value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["type"], "job_update");
        assert_eq!(value["job_id"], "job_abc");
        assert_eq!(value["article_id"], "art_1");
        assert_eq!(value["status"], "scraped");
        assert_eq!(value["completed"], 2);
        assert_eq!(value["total"], 3);
    }

    #[test]
    fn job_event_has_no_article() {
        let update = JobUpdate::for_job(&job());
        assert_eq!(update.article_id, None);
        assert_eq!(update.status, "in_progress");
    }

    #[test]
    fn event_roundtrip() {
        let update = JobUpdate::for_article(&job(), "art_1", ArticleStatus::Failed);
        let text = serde_json::to_string(&update).unwrap();
        let parsed: JobUpdate = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, update);
    }
}
