use std::future::Future;

use crate::error::AppError;
use crate::event::JobUpdate;

/// Content extracted from a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedContent {
    pub title: String,
    pub content: String,
}

/// Fetches a URL and extracts title and article body.
///
/// Treated as a black box by the dispatch fabric; any error counts toward
/// the article's retry budget.
pub trait Scraper: Send + Sync + Clone {
    fn scrape(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<ScrapedContent, AppError>> + Send;
}

/// Publishes progress events onto the job-updates channel.
///
/// Delivery is best-effort fan-out with no persistence: subscribers that are
/// not connected at publish time do not observe the event.
pub trait UpdatePublisher: Send + Sync + Clone {
    fn publish(
        &self,
        update: &JobUpdate,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
