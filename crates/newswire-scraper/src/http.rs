use std::time::Duration;

use reqwest::Client;
use scraper::Html;

use newswire_core::error::AppError;
use newswire_core::traits::{ScrapedContent, Scraper};

use crate::extract;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36";

/// HTTP scraper: fetches a page with reqwest and extracts title and body.
#[derive(Clone)]
pub struct HttpScraper {
    client: Client,
    timeout_secs: u64,
}

impl HttpScraper {
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| AppError::Network(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Scraper for HttpScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedContent, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::Network(format!("Connection failed: {e}"))
            } else {
                AppError::Scrape(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 => AppError::Scrape("404 Not Found".into()),
                403 => AppError::Scrape("403 Forbidden - Access denied".into()),
                code => AppError::Scrape(format!("HTTP Error {code}")),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| AppError::Scrape(format!("Failed to read response body: {e}")))?;

        parse(&html)
    }
}

/// Parse fetched HTML into title and content. Separate from the fetch so the
/// non-`Send` DOM never crosses an await point.
fn parse(html: &str) -> Result<ScrapedContent, AppError> {
    let document = Html::parse_document(html);
    let title = extract::extract_title(&document).unwrap_or_else(|| "Unknown Title".to_string());

    match extract::extract_content(&document) {
        Some(content) => Ok(ScrapedContent { title, content }),
        None => Err(AppError::Scrape(
            "Failed to extract article content".into(),
        )),
    }
}
