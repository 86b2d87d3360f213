use newswire_core::AppError;

/// Configuration for the Redis connection shared by queue and bus.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    /// Read configuration from environment variables.
    ///
    /// - `REDIS_URL` (optional, defaults to `redis://localhost:6379`)
    pub fn from_env() -> Result<Self, AppError> {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        if url.trim().is_empty() {
            return Err(AppError::Config("REDIS_URL must not be empty".into()));
        }
        Ok(Self { url })
    }
}
