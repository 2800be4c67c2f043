//! Core types for modfetch

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier for a [`Job`](crate::job::Job)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl JobId {
    /// Allocate the next identifier
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Items may still be added
    Accepting,
    /// No further items will be added; the sentinel is queued
    Finalized,
    /// Finalized and cancelled; remaining items are discarded
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Accepting => "accepting",
            JobStatus::Finalized => "finalized",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Why a single work item did not complete
///
/// Recorded in the owning job's failure map, keyed by the request path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Failure {
    /// The server answered with a status code other than the expected 200/206
    Status(u16),
    /// Connection, disk or preparation error while handling the item
    Transfer(String),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Status(code) => write!(f, "unexpected HTTP status {code}"),
            Failure::Transfer(msg) => write!(f, "transfer failed: {msg}"),
        }
    }
}

/// Event emitted by a [`Downloader`](crate::downloader::Downloader)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A request for an item was submitted on the connection
    ItemStarted {
        /// Owning job
        job: JobId,
        /// Request path
        request_id: String,
        /// Byte offset the transfer resumes from, if a range request was issued
        #[serde(skip_serializing_if = "Option::is_none")]
        resumed_from: Option<u64>,
    },

    /// An item finished and was handed to its destination
    ItemCompleted {
        /// Owning job
        job: JobId,
        /// Request path
        request_id: String,
        /// Bytes received in this transfer
        bytes: u64,
    },

    /// An item failed and was recorded in the job's failure map
    ItemFailed {
        /// Owning job
        job: JobId,
        /// Request path
        request_id: String,
        /// What went wrong
        failure: Failure,
    },

    /// An in-flight item was stopped by preemption and put back at the head of its job
    ItemRequeued {
        /// Owning job
        job: JobId,
        /// Request path
        request_id: String,
    },

    /// The active job was returned to the scheduler so a higher priority job can run
    JobPreempted {
        /// The job that was set aside
        job: JobId,
        /// Its priority
        priority: i32,
    },

    /// Every item of a job (including the sentinel) has been processed
    JobCompleted {
        /// The job
        job: JobId,
        /// Number of recorded failures
        failures: usize,
    },

    /// The downloader worker stopped
    Shutdown,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique_and_increasing() {
        let a = JobId::next();
        let b = JobId::next();
        assert!(b > a);
    }

    #[test]
    fn failure_display() {
        assert_eq!(Failure::Status(404).to_string(), "unexpected HTTP status 404");
        assert!(
            Failure::Transfer("reset".into())
                .to_string()
                .contains("reset")
        );
    }

    #[test]
    fn failure_serializes_tagged() {
        let json = serde_json::to_value(Failure::Status(503)).unwrap();
        assert_eq!(json["kind"], "status");
        assert_eq!(json["detail"], 503);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::JobCompleted {
            job: JobId(3),
            failures: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_completed");
        assert_eq!(json["job"], 3);
    }
}
