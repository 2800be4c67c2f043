//! Event helpers for integration tests

use std::collections::HashMap;
use std::time::Duration;

use modfetch::{Event, Failure, Job};
use tokio::sync::broadcast;

/// Default upper bound for anything a test waits on
pub const TIMEOUT: Duration = Duration::from_secs(15);

/// Wait for a job to finish, panicking on timeout
pub async fn join_job(job: &Job) -> HashMap<String, Failure> {
    tokio::time::timeout(TIMEOUT, job.join())
        .await
        .expect("timed out waiting for job")
}

/// Receive events until one matches `pred`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Every event currently buffered
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Request ids of `ItemCompleted` events, in order
pub fn completion_order(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ItemCompleted { request_id, .. } => Some(request_id.clone()),
            _ => None,
        })
        .collect()
}
