use futures::StreamExt;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use newswire_core::error::AppError;
use newswire_core::event::{JobUpdate, JOB_UPDATES_CHANNEL};
use newswire_core::traits::UpdatePublisher;

/// Buffered events between the Redis subscription and local subscribers.
const LOCAL_CAPACITY: usize = 1024;

/// Redis pub/sub bridge for progress events.
///
/// Workers only publish. The server side additionally runs [`RedisBus::listen`],
/// which subscribes to the channel and forwards every event into a local
/// broadcast channel that the broadcaster bridges to WebSocket sinks.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    channel: String,
    local: broadcast::Sender<JobUpdate>,
}

impl RedisBus {
    pub fn new(url: &str) -> Result<Self, AppError> {
        let client =
            redis::Client::open(url).map_err(|e| AppError::Bus(format!("Invalid Redis URL: {e}")))?;
        let (local, _) = broadcast::channel(LOCAL_CAPACITY);
        Ok(Self {
            client,
            channel: JOB_UPDATES_CHANNEL.to_string(),
            local,
        })
    }

    /// Subscribe to events forwarded by [`RedisBus::listen`].
    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.local.subscribe()
    }

    /// Consume the Redis subscription until cancellation, forwarding every
    /// parseable event to local subscribers. Run as a background task.
    pub async fn listen(self, cancel: CancellationToken) -> Result<(), AppError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| AppError::Bus(format!("Redis pubsub connection failed: {e}")))?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| AppError::Bus(e.to_string()))?;

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                message = messages.next() => {
                    let Some(message) = message else { break };
                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping non-text bus message");
                            continue;
                        }
                    };
                    match serde_json::from_str::<JobUpdate>(&payload) {
                        Ok(update) => {
                            let _ = self.local.send(update);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, %payload, "Dropping unparseable bus message");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl UpdatePublisher for RedisBus {
    async fn publish(&self, update: &JobUpdate) -> Result<(), AppError> {
        let payload = serde_json::to_string(update)?;
        let mut con = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Bus(format!("Redis connection failed: {e}")))?;
        con.publish::<_, _, ()>(&self.channel, payload)
            .await
            .map_err(|e| AppError::Bus(e.to_string()))?;
        Ok(())
    }
}
