use std::time::Duration;

use redis::AsyncCommands;

use newswire_core::error::AppError;
use newswire_core::queue::{Band, WorkItem, WorkQueue, QUEUE_PREFIX};

/// Redis-backed [`WorkQueue`] on three lists, one per priority band.
///
/// Items are LPUSHed and popped from the right, so `BRPOP high medium low`
/// is the atomic cross-band pop: the server scans the keys in the given
/// order and takes the oldest element of the first non-empty list. Retries
/// RPUSH onto `high`, landing them at the pop end.
#[derive(Clone)]
pub struct RedisQueue {
    client: redis::Client,
    keys: [String; 3],
}

impl RedisQueue {
    pub fn new(url: &str) -> Result<Self, AppError> {
        let client =
            redis::Client::open(url).map_err(|e| AppError::Queue(format!("Invalid Redis URL: {e}")))?;
        let keys = Band::ALL.map(|band| format!("{QUEUE_PREFIX}:{band}"));
        Ok(Self { client, keys })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Queue(format!("Redis connection failed: {e}")))
    }

    fn key(&self, band: Band) -> &str {
        &self.keys[band.index()]
    }

    /// Items currently queued in one band.
    pub async fn band_depth(&self, band: Band) -> Result<u64, AppError> {
        let mut con = self.connection().await?;
        let len: u64 = con
            .llen(self.key(band))
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(len)
    }
}

impl WorkQueue for RedisQueue {
    async fn push_tail(&self, band: Band, item: &WorkItem) -> Result<(), AppError> {
        let payload = serde_json::to_string(item)?;
        let mut con = self.connection().await?;
        con.lpush::<_, _, ()>(self.key(band), payload)
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn push_head(&self, band: Band, item: &WorkItem) -> Result<(), AppError> {
        let payload = serde_json::to_string(item)?;
        let mut con = self.connection().await?;
        con.rpush::<_, _, ()>(self.key(band), payload)
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<WorkItem>, AppError> {
        // A dedicated connection per pop keeps the blocking BRPOP from
        // stalling unrelated commands.
        let mut con = self.connection().await?;
        let popped: Option<(String, String)> = con
            .brpop(self.keys.to_vec(), timeout.as_secs_f64())
            .await
            .map_err(|e| AppError::Queue(e.to_string()))?;

        match popped {
            Some((_key, payload)) => match serde_json::from_str(&payload) {
                Ok(item) => Ok(Some(item)),
                Err(e) => {
                    tracing::error!(error = %e, %payload, "Discarding unparseable work item");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn drain_job(&self, job_id: &str) -> Result<u64, AppError> {
        let mut con = self.connection().await?;
        let mut removed = 0u64;

        for key in &self.keys {
            let payloads: Vec<String> = con
                .lrange(key, 0, -1)
                .await
                .map_err(|e| AppError::Queue(e.to_string()))?;

            for payload in payloads {
                let matches = serde_json::from_str::<WorkItem>(&payload)
                    .map(|item| item.job_id == job_id)
                    .unwrap_or(false);
                if matches {
                    let count: u64 = con
                        .lrem(key, 1, &payload)
                        .await
                        .map_err(|e| AppError::Queue(e.to_string()))?;
                    removed += count;
                }
            }
        }

        Ok(removed)
    }

    async fn depth(&self) -> Result<u64, AppError> {
        let mut con = self.connection().await?;
        let mut total = 0u64;
        for key in &self.keys {
            let len: u64 = con
                .llen(key)
                .await
                .map_err(|e| AppError::Queue(e.to_string()))?;
            total += len;
        }
        Ok(total)
    }
}
