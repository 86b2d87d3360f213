use thiserror::Error;

/// Application-wide error types for newswire.
#[derive(Error, Debug)]
pub enum AppError {
    /// Request rejected at ingress (bad URL, empty batch, out-of-range priority).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced job does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation conflicts with current state (e.g. cancelling a terminal job).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Work queue operation failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Event bus operation failed.
    #[error("Bus error: {0}")]
    Bus(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The scraper could not produce content for a URL. Counts toward the
    /// per-article retry budget, never retried in place.
    #[error("Scrape failed: {0}")]
    Scrape(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error at process start.
    #[error("Config error: {0}")]
    Config(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying in place.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Queue(_)
                | AppError::Bus(_)
                | AppError::Network(_)
                | AppError::Timeout(_)
        )
    }
}
