mod preemption;

use std::time::Duration;

use tokio::sync::broadcast;

use super::Downloader;
use crate::config::{DownloadConfig, RetryConfig, ServerConfig};
use crate::types::Event;
use mock_server::MockServer;

const TIMEOUT: Duration = Duration::from_secs(10);

fn test_config() -> DownloadConfig {
    DownloadConfig {
        block_size: 4096,
        user_agent: "modfetch-test".into(),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn server_config(server: &MockServer, template: &str) -> ServerConfig {
    ServerConfig::from_url(&server.base_url(), template).unwrap()
}

fn spawn_downloader(server: &MockServer, template: &str) -> Downloader {
    Downloader::spawn(server_config(server, template), test_config(), quick_retry())
}

/// Receive events until one matches `pred`
async fn wait_for(rx: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drain every event currently buffered
fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn enqueue_after_shutdown_is_rejected() {
    let server = MockServer::start(mock_server::Behavior::default()).await;
    let downloader = spawn_downloader(&server, "/{}");
    downloader.shutdown().await.unwrap();
    assert!(downloader.is_shut_down());

    let job = crate::job::Job::new("/tmp/unused", 0);
    let err = downloader.enqueue(job).await.unwrap_err();
    assert!(matches!(err, crate::error::Error::ShuttingDown));
}
