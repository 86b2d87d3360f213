use std::collections::HashSet;

use crate::article::{Article, ArticleDescriptor, ArticlePatch, ArticleStatus};
use crate::error::AppError;
use crate::queue::WorkItem;
use crate::store::Store;

/// What the submitter should do with one resolved article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Already scraped; the content is served from the cache.
    Cached,
    /// Fresh work: push this item onto the queue.
    Scheduled(WorkItem),
    /// Another job already has this URL in flight; do not schedule it again.
    InFlight,
}

/// One entry of the resolved batch, aligned with the collapsed input order.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub article: Article,
    pub disposition: Disposition,
}

impl Resolution {
    pub fn is_cached(&self) -> bool {
        matches!(self.disposition, Disposition::Cached)
    }
}

/// Classifies a batch of article descriptors against the article cache and
/// reserves identities for the new ones.
#[derive(Clone)]
pub struct Deduplicator<S: Store> {
    store: S,
}

impl<S: Store> Deduplicator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Collapse the batch by normalized URL (first occurrence wins) and
    /// resolve each unique descriptor. Every resolution increments the
    /// article's reference count exactly once.
    pub async fn resolve(
        &self,
        job_id: &str,
        batch: &[ArticleDescriptor],
    ) -> Result<Vec<Resolution>, AppError> {
        let mut seen = HashSet::new();
        let mut resolutions = Vec::new();

        for descriptor in batch {
            let descriptor = descriptor.normalized();
            if !seen.insert(descriptor.url.clone()) {
                continue;
            }

            let (article, existed) = self.store.upsert_article_pending(&descriptor).await?;

            let disposition = if !existed {
                Disposition::Scheduled(work_item(job_id, &article, descriptor.priority))
            } else {
                match article.status {
                    ArticleStatus::Scraped => Disposition::Cached,
                    // An in-flight worker will produce the result; scheduling
                    // it again would scrape the same URL twice.
                    ArticleStatus::Pending | ArticleStatus::Scraping => Disposition::InFlight,
                    ArticleStatus::Failed => {
                        self.reschedule_failed(job_id, &article, descriptor.priority)
                            .await?
                    }
                }
            };

            self.store.increment_reference(&article.id).await?;
            resolutions.push(Resolution {
                article,
                disposition,
            });
        }

        Ok(resolutions)
    }

    /// A previously failed article gets a fresh lifecycle. The reset is
    /// guarded on FAILED, so losing the race to a concurrent submission or
    /// worker just means re-reading and classifying the current state.
    async fn reschedule_failed(
        &self,
        job_id: &str,
        article: &Article,
        priority: u8,
    ) -> Result<Disposition, AppError> {
        let reset = ArticlePatch::reset_for_resubmit().require(&[ArticleStatus::Failed]);
        if self
            .store
            .update_article(&article.id, reset)
            .await?
            .is_some()
        {
            return Ok(Disposition::Scheduled(work_item(job_id, article, priority)));
        }

        match self.store.get_article(&article.id).await? {
            Some(current) if current.status == ArticleStatus::Scraped => Ok(Disposition::Cached),
            Some(_) => Ok(Disposition::InFlight),
            None => Err(AppError::Database(format!(
                "Article {} vanished during dedup",
                article.id
            ))),
        }
    }
}

fn work_item(job_id: &str, article: &Article, priority: u8) -> WorkItem {
    WorkItem {
        job_id: job_id.to_string(),
        article_id: article.id.clone(),
        url: article.url.clone(),
        priority,
        attempt: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemoryStore, descriptor};

    #[tokio::test]
    async fn fresh_urls_are_scheduled() {
        let store = MemoryStore::new();
        let dedup = Deduplicator::new(store.clone());

        let batch = vec![
            descriptor("https://example.com/a", 1),
            descriptor("https://example.com/b", 5),
        ];
        let resolutions = dedup.resolve("job_1", &batch).await.unwrap();

        assert_eq!(resolutions.len(), 2);
        for resolution in &resolutions {
            let Disposition::Scheduled(item) = &resolution.disposition else {
                panic!("expected scheduled work");
            };
            assert_eq!(item.job_id, "job_1");
            assert_eq!(item.attempt, 0);
        }

        let article = store
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.status, ArticleStatus::Pending);
        assert_eq!(article.reference_count, 1);
    }

    #[tokio::test]
    async fn scraped_article_is_a_cache_hit() {
        let store = MemoryStore::new();
        store.seed_scraped("https://example.com/a", "Title", "Body");
        let dedup = Deduplicator::new(store.clone());

        let resolutions = dedup
            .resolve("job_1", &[descriptor("https://example.com/a", 3)])
            .await
            .unwrap();

        assert_eq!(resolutions.len(), 1);
        assert!(resolutions[0].is_cached());

        let article = store
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.reference_count, 1);
    }

    #[tokio::test]
    async fn in_flight_article_is_not_rescheduled() {
        let store = MemoryStore::new();
        let dedup = Deduplicator::new(store.clone());

        // First job reserves the URL.
        let first = dedup
            .resolve("job_1", &[descriptor("https://example.com/a", 1)])
            .await
            .unwrap();
        assert!(matches!(first[0].disposition, Disposition::Scheduled(_)));

        // Second job sees it pending and must not queue it again.
        let second = dedup
            .resolve("job_2", &[descriptor("https://example.com/a", 1)])
            .await
            .unwrap();
        assert_eq!(second[0].disposition, Disposition::InFlight);

        let article = store
            .get_article_by_url("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(article.reference_count, 2);
    }

    #[tokio::test]
    async fn within_batch_duplicates_collapse_to_first() {
        let store = MemoryStore::new();
        let dedup = Deduplicator::new(store.clone());

        let batch = vec![
            descriptor("https://example.com/x", 1),
            descriptor("https://example.com/x", 9),
        ];
        let resolutions = dedup.resolve("job_1", &batch).await.unwrap();

        assert_eq!(resolutions.len(), 1);
        let Disposition::Scheduled(item) = &resolutions[0].disposition else {
            panic!("expected scheduled work");
        };
        // First occurrence's priority wins.
        assert_eq!(item.priority, 1);
    }

    #[tokio::test]
    async fn url_spellings_collapse_after_normalization() {
        let store = MemoryStore::new();
        let dedup = Deduplicator::new(store.clone());

        let batch = vec![
            descriptor("https://Example.com/a/", 2),
            descriptor("https://example.com/a", 8),
        ];
        let resolutions = dedup.resolve("job_1", &batch).await.unwrap();
        assert_eq!(resolutions.len(), 1);
    }

    #[tokio::test]
    async fn resolution_order_does_not_change_the_article_set() {
        let b1 = vec![
            descriptor("https://example.com/a", 1),
            descriptor("https://example.com/b", 5),
        ];
        let b2 = vec![
            descriptor("https://example.com/b", 2),
            descriptor("https://example.com/c", 9),
        ];

        async fn resolved_urls(
            first: &[ArticleDescriptor],
            second: &[ArticleDescriptor],
        ) -> Vec<String> {
            let store = MemoryStore::new();
            let dedup = Deduplicator::new(store.clone());
            dedup.resolve("job_1", first).await.unwrap();
            dedup.resolve("job_2", second).await.unwrap();

            let mut found = Vec::new();
            for path in ["a", "b", "c"] {
                let url = format!("https://example.com/{path}");
                if store.get_article_by_url(&url).await.unwrap().is_some() {
                    found.push(url);
                }
            }
            found
        }

        let forward = resolved_urls(&b1, &b2).await;
        let backward = resolved_urls(&b2, &b1).await;
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 3);
    }

    #[tokio::test]
    async fn failed_article_gets_a_fresh_lifecycle() {
        let store = MemoryStore::new();
        let article = store.seed_failed("https://example.com/broken", "503 upstream");
        assert_eq!(article.retry_count, 3);

        let dedup = Deduplicator::new(store.clone());
        let resolutions = dedup
            .resolve("job_2", &[descriptor("https://example.com/broken", 4)])
            .await
            .unwrap();

        assert!(matches!(
            resolutions[0].disposition,
            Disposition::Scheduled(_)
        ));
        let article = store.get_article(&article.id).await.unwrap().unwrap();
        assert_eq!(article.status, ArticleStatus::Pending);
        assert_eq!(article.retry_count, 0);
        assert_eq!(article.error_message, None);
    }
}
