use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crawlboard::config::BackendConfig;
use crawlboard::events::{
    ConnectionState, LiveStatus, StatusWatcher, WatchPolicy, WatchUpdate,
};
use crawlboard::model::StreamEvent;

fn event_json(count: u64, url: &str) -> String {
    serde_json::json!({
        "type": "crawl_job_update",
        "crawler_id": 4,
        "crawl_job": {"id": 9, "state": "running", "crawled_url_count": count},
        "items_processed": count,
        "current_url": url,
        "timestamp": "2026-01-05T10:00:00Z",
    })
    .to_string()
}

/// Serves one SSE response with two events, then rejects every reconnect.
fn spawn_stream_stub() -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let addr = server.server_addr();
    let base_url = format!("http://{addr}/api");

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let handle = thread::spawn(move || {
        let mut served_stream = false;
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            if request.url() != "/api/crawlers/4/status_stream/" {
                let _ = request
                    .respond(tiny_http::Response::from_string("not found").with_status_code(404));
                continue;
            }

            if served_stream {
                let _ = request.respond(
                    tiny_http::Response::from_string("stream unavailable").with_status_code(503),
                );
                continue;
            }
            served_stream = true;

            let body = format!(
                ": connected\n\ndata: {}\n\ndata: {}\n\n",
                event_json(10, "https://x.test/a"),
                event_json(20, "https://x.test/b"),
            );
            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"text/event-stream"[..],
            )
            .expect("build header");
            let _ = request.respond(
                tiny_http::Response::from_string(body)
                    .with_status_code(200)
                    .with_header(header),
            );
        }
    });

    (base_url, shutdown_tx, handle)
}

fn test_policy() -> WatchPolicy {
    WatchPolicy {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        max_attempts: 2,
    }
}

async fn collect_updates(mut rx: tokio::sync::mpsc::Receiver<WatchUpdate>) -> Vec<WatchUpdate> {
    let mut updates = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(update)) => updates.push(update),
            Ok(None) => break,
            Err(_) => panic!("watcher did not finish in time; got {updates:?}"),
        }
    }
    updates
}

#[tokio::test]
async fn watcher_delivers_events_then_gives_up_after_max_attempts() {
    let (base_url, shutdown_tx, handle) = spawn_stream_stub();
    let config = BackendConfig {
        base_url,
        csrf_token: None,
        request_timeout_secs: 5,
    };

    let (watcher, rx) =
        StatusWatcher::spawn(&config, 4, test_policy()).expect("spawn watcher");
    let updates = collect_updates(rx).await;
    watcher.close().await;

    let counts: Vec<u64> = updates
        .iter()
        .filter_map(|update| match update {
            WatchUpdate::Event {
                event: StreamEvent::CrawlJobUpdate { crawl_job, .. },
            } => Some(crawl_job.crawled_url_count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![10, 20]);

    let connected = updates
        .iter()
        .filter(|update| {
            matches!(
                update,
                WatchUpdate::State {
                    state: ConnectionState::Connected
                }
            )
        })
        .count();
    assert_eq!(connected, 1, "the 503 reconnects never reach connected");

    assert_eq!(
        updates.last(),
        Some(&WatchUpdate::State {
            state: ConnectionState::GaveUp
        }),
        "the watcher must end in the terminal gave-up state"
    );

    // Replaying the same updates against a view yields the stream's final
    // numbers.
    let mut status = LiveStatus::default();
    for update in &updates {
        status.apply(update);
    }
    assert_eq!(status.connection, ConnectionState::GaveUp);
    assert_eq!(status.job.map(|job| job.crawled_url_count), Some(20));

    let _ = shutdown_tx.send(());
    let _ = handle.join();
}

#[tokio::test]
async fn close_cancels_a_backing_off_watcher() {
    // No server at all: every connect fails fast.
    let config = BackendConfig {
        base_url: "http://127.0.0.1:9/api".to_string(),
        csrf_token: None,
        request_timeout_secs: 5,
    };
    let policy = WatchPolicy {
        initial_backoff: Duration::from_secs(30),
        max_backoff: Duration::from_secs(30),
        max_attempts: 8,
    };

    let (watcher, mut rx) = StatusWatcher::spawn(&config, 4, policy).expect("spawn watcher");

    // Wait until the watcher enters its long backoff, then close it.
    loop {
        let update = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("watcher update")
            .expect("watcher channel open");
        if update
            == (WatchUpdate::State {
                state: ConnectionState::BackingOff,
            })
        {
            break;
        }
    }

    tokio::time::timeout(Duration::from_secs(5), watcher.close())
        .await
        .expect("close returns promptly");
}
