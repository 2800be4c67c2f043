//! Priority-aware download worker
//!
//! A [`Downloader`] owns one background task and one persistent HTTP/1.1 connection to one
//! server. Jobs are enqueued into priority buckets; the worker drains the highest-priority job
//! item by item, pipelining the next request while the current body streams to disk.
//!
//! - [`scheduler`] - priority buckets and job selection
//! - [`request`] - URL templates and output files
//! - [`worker`] - the per-item request/response protocol

mod request;
mod scheduler;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DownloadConfig, RetryConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::types::Event;
use scheduler::Scheduler;

/// State shared between the [`Downloader`] handle and its worker task
pub(crate) struct Shared {
    pub(crate) scheduler: Mutex<Scheduler>,
    /// Set when the active job should yield to a higher-priority one
    pub(crate) interrupt: AtomicBool,
    /// Signalled when new jobs arrive or the interrupt flag is raised
    pub(crate) wakeup: Notify,
    pub(crate) shutdown: CancellationToken,
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl Shared {
    /// Broadcast `event` to all subscribers
    pub(crate) fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

/// Handle to a download worker bound to one server
///
/// Cloning yields another handle to the same worker.
#[derive(Clone)]
pub struct Downloader {
    shared: Arc<Shared>,
    server: Arc<ServerConfig>,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl Downloader {
    /// Start a worker for `server`
    ///
    /// Must be called from within a tokio runtime. No connection is opened until the first
    /// item is requested.
    pub fn spawn(server: ServerConfig, config: DownloadConfig, retry: RetryConfig) -> Self {
        let (event_tx, _rx) = broadcast::channel(config.event_buffer.max(1));
        let shared = Arc::new(Shared {
            scheduler: Mutex::new(Scheduler::default()),
            interrupt: AtomicBool::new(false),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            event_tx,
        });

        tracing::info!(
            host = %server.host,
            port = server.port,
            tls = server.tls,
            pipelining = server.supports_pipelining,
            range = server.supports_range,
            "starting downloader"
        );

        let worker = worker::Worker::new(shared.clone(), server.clone(), config, retry);
        let task = tokio::spawn(worker.run());

        Self {
            shared,
            server: Arc::new(server),
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }

    /// Server this downloader talks to
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// Hand `job` to the worker
    ///
    /// If the job outranks the job currently being downloaded, the worker is interrupted and
    /// switches over before its next item.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let preempt = {
            let mut scheduler = self.shared.scheduler.lock().await;
            let preempt = scheduler.outranks_active(&job);
            tracing::debug!(
                job_id = %job.id(),
                priority = job.priority(),
                preempt,
                waiting = scheduler.waiting() + 1,
                "job enqueued"
            );
            scheduler.push_back(job);
            preempt
        };

        if preempt {
            self.shared.interrupt.store(true, Ordering::SeqCst);
        }
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Make the worker yield the active job and re-run job selection
    ///
    /// A transfer in progress stops within one block and resumes later from where it left off.
    /// May be called from any task or thread.
    pub fn interrupt(&self) {
        self.shared.interrupt.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
    }

    /// Subscribe to downloader events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.event_tx.subscribe()
    }

    /// Stop the worker and wait for it to exit
    ///
    /// The transfer in progress stops within one block. Jobs still owned by the downloader
    /// are cancelled and completed so that their `join()` returns.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(host = %self.server.host, "shutting down downloader");
        self.shared.shutdown.cancel();
        self.shared.wakeup.notify_one();

        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "downloader task failed");
        }

        // The worker drains the scheduler on exit; this covers a worker that panicked
        let leftovers = self.shared.scheduler.lock().await.drain();
        for job in leftovers {
            job.abandon();
        }
        Ok(())
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}
