//! Black-box tests for the HTTP and WebSocket surface, running the full
//! submit → dedup → queue → worker → broadcast pipeline on in-memory
//! backends.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use newswire_core::broadcast::Broadcaster;
use newswire_core::queue::WorkQueue;
use newswire_core::retry::RetryPolicy;
use newswire_core::testutil::{MemoryBus, MemoryQueue, MemoryStore, MockScraper};
use newswire_core::worker::{Worker, WorkerConfig, WorkerReporter};
use newswire_server::routes;
use newswire_server::state::AppState;

struct NullReporter;
impl WorkerReporter for NullReporter {}

struct TestApp {
    addr: SocketAddr,
    store: MemoryStore,
    queue: MemoryQueue,
    bus: MemoryBus,
    client: reqwest::Client,
}

impl TestApp {
    async fn spawn() -> Self {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let bus = MemoryBus::new();
        let broadcaster = Broadcaster::new();
        tokio::spawn(broadcaster.clone().forward(bus.subscribe()));

        let state = Arc::new(AppState::new(
            store.clone(),
            queue.clone(),
            bus.clone(),
            broadcaster,
        ));
        let app = routes::router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            store,
            queue,
            bus,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Process every queued item (including retries) with the given scraper.
    async fn drain_queue(&self, scraper: MockScraper) {
        let config = WorkerConfig::default()
            .with_worker_id("test-worker")
            .with_poll_timeout(Duration::from_millis(10))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            });
        let worker = Worker::new(
            self.store.clone(),
            self.queue.clone(),
            self.bus.clone(),
            scraper,
            config,
        );
        let cancel = CancellationToken::new();
        while let Ok(Some(item)) = self.queue.pop(Duration::from_millis(20)).await {
            worker.process_item(&item, &NullReporter, &cancel).await;
        }
    }

    async fn submit(&self, articles: serde_json::Value) -> (reqwest::StatusCode, serde_json::Value) {
        let response = self
            .client
            .post(self.url("/jobs/submit"))
            .json(&serde_json::json!({ "articles": articles }))
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.json().await.unwrap();
        (status, body)
    }
}

fn article(url: &str, priority: u8) -> serde_json::Value {
    serde_json::json!({
        "url": url,
        "source": "TechNews",
        "category": "AI",
        "priority": priority,
    })
}

#[tokio::test]
async fn health_returns_200() {
    let app = TestApp::spawn().await;

    let response = reqwest::get(app.url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "ok");
}

#[tokio::test]
async fn fresh_batch_runs_to_completion() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .submit(serde_json::json!([
            article("https://example.com/u/a", 1),
            article("https://example.com/u/b", 5),
        ]))
        .await;

    assert_eq!(status, 201);
    assert_eq!(body["total_articles"], 2);
    assert_eq!(body["new_articles"], 2);
    assert_eq!(body["cached_articles"], 0);
    assert_eq!(body["status"], "in_progress");
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(job_id.starts_with("job_"));

    app.drain_queue(MockScraper::ok()).await;

    let status: serde_json::Value = reqwest::get(app.url(&format!("/jobs/{job_id}/status")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "completed");
    assert_eq!(status["completed"], 2);
    assert_eq!(status["failed"], 0);
    assert_eq!(status["pending"], 0);

    let results: serde_json::Value = reqwest::get(app.url(&format!("/jobs/{job_id}/results")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["successful"], 2);
    assert_eq!(results["results"].as_array().unwrap().len(), 2);
    assert_eq!(results["results"][0]["cached"], false);
    assert!(results["results"][0]["title"].is_string());
}

#[tokio::test]
async fn cached_submission_completes_without_queueing() {
    let app = TestApp::spawn().await;
    app.store
        .seed_scraped("https://example.com/u/a", "Cached Title", "Cached body");

    let (status, body) = app
        .submit(serde_json::json!([article("https://example.com/u/a", 3)]))
        .await;

    assert_eq!(status, 201);
    assert_eq!(body["total_articles"], 1);
    assert_eq!(body["new_articles"], 0);
    assert_eq!(body["cached_articles"], 1);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["message"], "Job completed - all articles from cache");
    assert_eq!(app.queue.depth().await.unwrap(), 0);

    let job_id = body["job_id"].as_str().unwrap();
    let results: serde_json::Value = reqwest::get(app.url(&format!("/jobs/{job_id}/results")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["results"][0]["cached"], true);
    assert_eq!(results["results"][0]["title"], "Cached Title");
}

#[tokio::test]
async fn empty_batch_is_unprocessable() {
    let app = TestApp::spawn().await;
    let (status, body) = app.submit(serde_json::json!([])).await;
    assert_eq!(status, 422);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn invalid_url_is_unprocessable() {
    let app = TestApp::spawn().await;
    let (status, _body) = app.submit(serde_json::json!([article("not-a-url", 1)])).await;
    assert_eq!(status, 422);
}

#[tokio::test]
async fn unknown_job_is_404() {
    let app = TestApp::spawn().await;

    let response = reqwest::get(app.url("/jobs/job_missing/status")).await.unwrap();
    assert_eq!(response.status(), 404);

    let response = app
        .client
        .delete(app.url("/jobs/job_missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn retry_exhaustion_is_reported_in_results() {
    let app = TestApp::spawn().await;

    let (_, body) = app
        .submit(serde_json::json!([article("https://example.com/u/z", 1)]))
        .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    app.drain_queue(MockScraper::failing()).await;

    let status: serde_json::Value = reqwest::get(app.url(&format!("/jobs/{job_id}/status")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["failed"], 1);
    assert_eq!(status["status"], "failed");

    let results: serde_json::Value = reqwest::get(app.url(&format!("/jobs/{job_id}/results")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["failed"], 1);
    let failed = &results["failed_articles"][0];
    assert_eq!(failed["url"], "https://example.com/u/z");
    assert!(failed["error"].as_str().unwrap().contains("fails"));
}

#[tokio::test]
async fn mid_flight_cancel_drains_the_queue() {
    let app = TestApp::spawn().await;

    let articles: Vec<serde_json::Value> = (0..10)
        .map(|i| article(&format!("https://example.com/u/{i}"), 10))
        .collect();
    let (_, body) = app.submit(serde_json::Value::Array(articles)).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // One worker already leased an item before the cancellation lands.
    let leased = app
        .queue
        .pop(Duration::from_millis(20))
        .await
        .unwrap()
        .unwrap();

    let response = app
        .client
        .delete(app.url(&format!("/jobs/{job_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let cancel_body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(cancel_body["status"], "cancelled");
    assert_eq!(cancel_body["removed_tasks"], 9);
    assert_eq!(app.queue.depth().await.unwrap(), 0);

    // Cancelling again is a client error.
    let response = app
        .client
        .delete(app.url(&format!("/jobs/{job_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // The in-flight worker drops its leased item silently: no scrape event,
    // no counter movement.
    let published_before = app.bus.published().len();
    let config = WorkerConfig::default().with_poll_timeout(Duration::from_millis(10));
    let worker = Worker::new(
        app.store.clone(),
        app.queue.clone(),
        app.bus.clone(),
        MockScraper::ok(),
        config,
    );
    worker
        .process_item(&leased, &NullReporter, &CancellationToken::new())
        .await;
    assert_eq!(app.bus.published().len(), published_before);

    let status: serde_json::Value = reqwest::get(app.url(&format!("/jobs/{job_id}/status")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "cancelled");
    assert_eq!(status["completed"], 0);
}

#[tokio::test]
async fn list_jobs_filters_by_status() {
    let app = TestApp::spawn().await;
    app.store
        .seed_scraped("https://example.com/u/cached", "T", "C");

    let (_, cached) = app
        .submit(serde_json::json!([article("https://example.com/u/cached", 1)]))
        .await;
    let (_, open) = app
        .submit(serde_json::json!([article("https://example.com/u/new", 1)]))
        .await;

    let listed: serde_json::Value =
        reqwest::get(app.url("/jobs/?status_filter=in_progress&limit=10&skip=0"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    let listed = listed.as_array().unwrap().clone();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["job_id"], open["job_id"]);

    let all: serde_json::Value = reqwest::get(app.url("/jobs")).await.unwrap().json().await.unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);

    let bad = reqwest::get(app.url("/jobs/?status_filter=bogus")).await.unwrap();
    assert_eq!(bad.status(), 422);

    assert!(cached["job_id"].as_str().unwrap().starts_with("job_"));
}

#[tokio::test]
async fn websocket_fan_out_reaches_all_scopes() {
    let app = TestApp::spawn().await;

    // All-jobs subscriber connects before submission.
    let (mut all_ws, _) = tokio_tungstenite::connect_async(app.ws_url("/ws"))
        .await
        .unwrap();

    let (_, body) = app
        .submit(serde_json::json!([
            article("https://example.com/u/1", 1),
            article("https://example.com/u/2", 1),
            article("https://example.com/u/3", 1),
        ]))
        .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    // Two job-scoped subscribers.
    let (mut job_ws_a, _) =
        tokio_tungstenite::connect_async(app.ws_url(&format!("/ws/jobs/{job_id}")))
            .await
            .unwrap();
    let (mut job_ws_b, _) =
        tokio_tungstenite::connect_async(app.ws_url(&format!("/ws/jobs/{job_id}")))
            .await
            .unwrap();

    app.drain_queue(MockScraper::ok()).await;

    async fn read_scraped_events(
        ws: &mut (impl futures::Stream<
            Item = Result<
                tokio_tungstenite::tungstenite::Message,
                tokio_tungstenite::tungstenite::Error,
            >,
        > + Unpin),
        expected: usize,
    ) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while events.len() < expected {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for WebSocket event")
                .expect("socket closed early")
                .expect("socket error");
            let text = match message {
                tokio_tungstenite::tungstenite::Message::Text(text) => text.to_string(),
                _ => continue,
            };
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            if value["type"] == "job_update" && value["status"] == "scraped" {
                events.push(value);
            }
        }
        events
    }

    let events_a = read_scraped_events(&mut job_ws_a, 3).await;
    let events_b = read_scraped_events(&mut job_ws_b, 3).await;
    let events_all = read_scraped_events(&mut all_ws, 3).await;

    for events in [&events_a, &events_b, &events_all] {
        assert!(events.iter().all(|e| e["job_id"] == job_id.as_str()));
        let final_event = events.last().unwrap();
        assert_eq!(final_event["completed"], 3);
        assert_eq!(final_event["total"], 3);
    }
}

#[tokio::test]
async fn websocket_ping_gets_pong() {
    let app = TestApp::spawn().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(app.ws_url("/ws"))
        .await
        .unwrap();

    use futures::SinkExt;
    ws.send(tokio_tungstenite::tungstenite::Message::Text("ping".into()))
        .await
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        reply,
        tokio_tungstenite::tungstenite::Message::Text("pong".into())
    );
}
