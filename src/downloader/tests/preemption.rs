//! Priority scheduling and preemption of the active job

use std::time::Duration;

use super::mock_server::{Behavior, MockServer, payload};
use super::*;
use crate::job::{Destination, Job};

fn position(events: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("event not found in {events:?}"))
}

fn completed(path: &'static str) -> impl Fn(&Event) -> bool {
    move |e| matches!(e, Event::ItemCompleted { request_id, .. } if request_id == path)
}

#[tokio::test]
async fn higher_priority_job_preempts_slow_transfer() {
    let slow_body = payload(256 * 1024, 1);
    let server = MockServer::start(
        Behavior::default()
            .file("/low-big", slow_body.clone())
            .slow("/low-big", 4096, Duration::from_millis(10))
            .file("/low-small", payload(2_000, 2))
            .file("/high", payload(3_000, 3)),
    )
    .await;
    let out = tempfile::tempdir().unwrap();
    let downloader = spawn_downloader(&server, "/{}");
    let mut events = downloader.subscribe();

    let low = Job::new(out.path().join("low"), 0);
    low.add(Destination::path("big.jar"), ["low-big"]).unwrap();
    low.add(Destination::path("small.jar"), ["low-small"]).unwrap();
    low.finalize();
    downloader.enqueue(low.clone()).await.unwrap();

    wait_for(&mut events, |e| {
        matches!(e, Event::ItemStarted { request_id, .. } if request_id == "/low-big")
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let high = Job::new(out.path().join("high"), 10);
    high.add(Destination::path("h.jar"), ["high"]).unwrap();
    high.finalize();
    downloader.enqueue(high.clone()).await.unwrap();

    let high_failures = tokio::time::timeout(TIMEOUT, high.join()).await.unwrap();
    let low_failures = tokio::time::timeout(TIMEOUT, low.join()).await.unwrap();
    assert!(high_failures.is_empty(), "{high_failures:?}");
    assert!(low_failures.is_empty(), "{low_failures:?}");

    assert_eq!(
        std::fs::read(out.path().join("low/big.jar")).unwrap(),
        slow_body,
        "resumed download must be byte-identical"
    );
    assert!(out.path().join("low/small.jar").exists());
    assert!(out.path().join("high/h.jar").exists());

    let log = drain_events(&mut events);
    let high_done = position(&log, completed("/high"));
    let big_done = position(&log, completed("/low-big"));
    assert!(high_done < big_done, "{log:?}");
    assert!(
        log.iter()
            .any(|e| matches!(e, Event::JobPreempted { job, .. } if *job == low.id())),
        "{log:?}"
    );
    assert!(
        log.iter()
            .any(|e| matches!(e, Event::ItemRequeued { request_id, .. } if request_id == "/low-big")),
        "{log:?}"
    );

    // The interrupted transfer was resumed where it stopped
    let big_requests: Vec<_> = server
        .requests()
        .into_iter()
        .filter(|r| r.path == "/low-big")
        .collect();
    assert_eq!(big_requests.len(), 2, "{big_requests:?}");
    assert_eq!(big_requests[0].range_from, None);
    assert!(big_requests[1].range_from.unwrap_or(0) > 0);

    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn waiting_jobs_run_in_priority_order() {
    let server = MockServer::start(
        Behavior::default()
            .file("/gate", payload(64 * 1024, 1))
            .slow("/gate", 4096, Duration::from_millis(5))
            .file("/a", payload(100, 2))
            .file("/b", payload(100, 3))
            .file("/c", payload(100, 4)),
    )
    .await;
    let out = tempfile::tempdir().unwrap();
    let mut cfg = server_config(&server, "/{}");
    cfg.supports_pipelining = false;
    let downloader = Downloader::spawn(cfg, test_config(), quick_retry());

    // Highest priority, so nothing below preempts it
    let gate = Job::new(out.path(), 100);
    gate.add(Destination::path("gate.jar"), ["gate"]).unwrap();
    gate.finalize();
    downloader.enqueue(gate.clone()).await.unwrap();

    let a = Job::new(out.path(), 1);
    let b = Job::new(out.path(), 5);
    let c = Job::new(out.path(), 1);
    for (job, name) in [(&a, "a"), (&b, "b"), (&c, "c")] {
        job.add(Destination::path(format!("{name}.jar")), [name]).unwrap();
        job.finalize();
        downloader.enqueue(job.clone()).await.unwrap();
    }

    for job in [&gate, &a, &b, &c] {
        let failures = tokio::time::timeout(TIMEOUT, job.join()).await.unwrap();
        assert!(failures.is_empty());
    }

    assert_eq!(server.paths(), vec!["/gate", "/b", "/a", "/c"]);
    downloader.shutdown().await.unwrap();
}

#[tokio::test]
async fn manual_interrupt_reselects_same_job() {
    let body = payload(128 * 1024, 5);
    let server = MockServer::start(
        Behavior::default()
            .file("/only", body.clone())
            .slow("/only", 4096, Duration::from_millis(5)),
    )
    .await;
    let out = tempfile::tempdir().unwrap();
    let downloader = spawn_downloader(&server, "/{}");
    let mut events = downloader.subscribe();

    let job = Job::new(out.path(), 0);
    job.add(Destination::path("only.jar"), ["only"]).unwrap();
    job.finalize();
    downloader.enqueue(job.clone()).await.unwrap();

    wait_for(&mut events, |e| matches!(e, Event::ItemStarted { .. })).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    downloader.interrupt();

    let failures = tokio::time::timeout(TIMEOUT, job.join()).await.unwrap();
    assert!(failures.is_empty());
    assert_eq!(std::fs::read(out.path().join("only.jar")).unwrap(), body);

    downloader.shutdown().await.unwrap();
}
