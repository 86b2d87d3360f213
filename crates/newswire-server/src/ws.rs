use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use newswire_core::event::JobUpdate;
use newswire_core::queue::WorkQueue;
use newswire_core::store::Store;
use newswire_core::traits::UpdatePublisher;

use crate::state::AppState;

/// Idle connections get a heartbeat at this interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket endpoint streaming every job's updates.
pub async fn ws_all<S, Q, B>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S, Q, B>>>,
) -> impl IntoResponse
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    let updates = state.broadcaster.subscribe_all();
    ws.on_upgrade(move |socket| stream_updates(socket, updates))
}

/// WebSocket endpoint streaming one job's updates.
pub async fn ws_job<S, Q, B>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S, Q, B>>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    let updates = state.broadcaster.subscribe_job(&job_id);
    ws.on_upgrade(move |socket| stream_updates(socket, updates))
}

/// Forward broadcast events to one socket until either side goes away.
///
/// A lagging connection only loses its oldest events; `ping` texts get a
/// `pong`, and silence beyond the heartbeat interval produces a heartbeat
/// frame so proxies keep the connection open.
async fn stream_updates(socket: WebSocket, mut updates: broadcast::Receiver<JobUpdate>) {
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => {
                    let Ok(text) = serde_json::to_string(&update) else {
                        continue;
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(%missed, "WebSocket client lagging, dropped oldest events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) if text.as_str() == "ping" => {
                    if sink.send(Message::Text("pong".into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            () = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                if sink
                    .send(Message::Text(r#"{"type":"heartbeat"}"#.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
}
