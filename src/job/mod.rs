//! Download jobs
//!
//! A [`Job`] is a batch of work items that is scheduled, queried and cancelled as a unit.
//! Producers call [`Job::add`] from any task or thread, then [`Job::finalize`] (or
//! [`Job::join`], which finalizes implicitly). The downloader worker consumes items in FIFO
//! order; the job completes once the end-of-job sentinel has been consumed and every consumed
//! item has been marked done.
//!
//! ```no_run
//! use modfetch::job::{Destination, Job};
//!
//! # async fn example() -> modfetch::Result<()> {
//! let job = Job::builder("/tmp/mods").priority(10).build();
//! job.add(Destination::path("jei.jar"), ["238222", "4712866"])?;
//! // hand the job to a downloader, then:
//! let failures = job.join().await;
//! assert!(failures.is_empty());
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};

use crate::error::{JobError, Result};
use crate::progress::{ProgressMode, SharedProgress};
use crate::types::{Failure, JobId, JobStatus};

/// Sweep width of the overall indeterminate progress indicator, in finished items
const INDETERMINATE_SWEEP: u64 = 25;

/// Callback receiving a downloaded file, rewound to offset 0
///
/// The callback owns the file; it is invoked on the downloader task and should hand heavy
/// work (such as decompression) to another task.
pub type SinkFn = Box<dyn FnOnce(std::fs::File) + Send + 'static>;

/// Where the bytes of a work item end up
pub enum Destination {
    /// Path relative to the job's output directory
    ///
    /// The body is written to `<path>.part` and renamed once complete.
    Path(PathBuf),
    /// Anonymous staging file handed to a callback once complete
    Sink(SinkFn),
}

impl Destination {
    /// Relative output path
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Destination::Path(path.into())
    }

    /// Callback destination
    pub fn sink(f: impl FnOnce(std::fs::File) + Send + 'static) -> Self {
        Destination::Sink(Box::new(f))
    }

    /// Final file name, used for the `{filename}` placeholder of URL templates
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Destination::Path(p) => p.file_name().and_then(|n| n.to_str()),
            Destination::Sink(_) => None,
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Destination::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}

/// One file to download
#[derive(Debug)]
pub struct WorkItem {
    /// Where the body goes
    pub destination: Destination,
    /// Values substituted into the server's URL template
    pub params: Vec<String>,
}

/// Entry of a job's FIFO queue
#[derive(Debug)]
pub(crate) enum QueueEntry {
    Item(WorkItem),
    /// End-of-job sentinel appended by `finalize()`
    End,
}

struct JobState {
    status: JobStatus,
    queue: VecDeque<QueueEntry>,
    item_count: usize,
    /// Items handed to the worker and not yet marked done
    pending: usize,
    sentinel_seen: bool,
}

struct JobInner {
    id: JobId,
    priority: i32,
    output_dir: PathBuf,
    state: Mutex<JobState>,
    failures: Mutex<HashMap<String, Failure>>,
    completed: Mutex<Vec<PathBuf>>,
    item_ready: Notify,
    done: watch::Sender<bool>,
    progress: Option<SharedProgress>,
    file_progress: Option<SharedProgress>,
    total_size: Option<u64>,
}

/// A batch of downloads with a shared priority, failure map and completion signal
///
/// Cloning yields another handle to the same job.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

/// Builder for [`Job`]
pub struct JobBuilder {
    output_dir: PathBuf,
    priority: i32,
    progress: Option<SharedProgress>,
    file_progress: Option<SharedProgress>,
    total_size: Option<u64>,
}

impl JobBuilder {
    /// Scheduling priority; higher runs first (default: 0)
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Reporter for the progress of the whole job
    pub fn progress(mut self, progress: SharedProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Reporter reset for every file and fed with its bytes
    pub fn file_progress(mut self, progress: SharedProgress) -> Self {
        self.file_progress = Some(progress);
        self
    }

    /// Sum of all file sizes, if known
    ///
    /// With a total the overall reporter advances per byte; without one it advances once per
    /// finished item.
    pub fn total_size(mut self, bytes: u64) -> Self {
        self.total_size = Some(bytes);
        self
    }

    /// Create the job
    pub fn build(self) -> Job {
        if let Some(progress) = &self.progress {
            match self.total_size {
                Some(total) => progress.configure(ProgressMode::Determinate, total),
                None => progress.configure(ProgressMode::Indeterminate, INDETERMINATE_SWEEP),
            }
        }

        let (done, _) = watch::channel(false);
        Job {
            inner: Arc::new(JobInner {
                id: JobId::next(),
                priority: self.priority,
                output_dir: self.output_dir,
                state: Mutex::new(JobState {
                    status: JobStatus::Accepting,
                    queue: VecDeque::new(),
                    item_count: 0,
                    pending: 0,
                    sentinel_seen: false,
                }),
                failures: Mutex::new(HashMap::new()),
                completed: Mutex::new(Vec::new()),
                item_ready: Notify::new(),
                done,
                progress: self.progress,
                file_progress: self.file_progress,
                total_size: self.total_size,
            }),
        }
    }
}

impl Job {
    /// Start building a job that writes into `output_dir`
    pub fn builder(output_dir: impl Into<PathBuf>) -> JobBuilder {
        JobBuilder {
            output_dir: output_dir.into(),
            priority: 0,
            progress: None,
            file_progress: None,
            total_size: None,
        }
    }

    /// Job with the given priority and no progress reporting
    pub fn new(output_dir: impl Into<PathBuf>, priority: i32) -> Self {
        Self::builder(output_dir).priority(priority).build()
    }

    /// Process-unique id
    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// Scheduling priority
    pub fn priority(&self) -> i32 {
        self.inner.priority
    }

    /// Directory that `Destination::Path` items are resolved against
    pub fn output_dir(&self) -> &Path {
        &self.inner.output_dir
    }

    /// Current lifecycle state
    pub fn status(&self) -> JobStatus {
        self.lock_state().status
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        self.status() == JobStatus::Cancelled
    }

    /// Number of items added so far
    pub fn item_count(&self) -> usize {
        self.lock_state().item_count
    }

    /// Snapshot of the failures recorded so far, keyed by request path
    pub fn failures(&self) -> HashMap<String, Failure> {
        lock(&self.inner.failures).clone()
    }

    /// Final paths of the `Destination::Path` items that downloaded successfully
    pub fn completed_paths(&self) -> Vec<PathBuf> {
        lock(&self.inner.completed).clone()
    }

    /// Whether the completion signal has fired
    pub fn is_complete(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// Queue a file for download
    ///
    /// Fails with [`JobError::NotAccepting`] once the job has been finalized or cancelled.
    pub fn add<I, S>(&self, destination: Destination, params: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let item = WorkItem {
            destination,
            params: params.into_iter().map(Into::into).collect(),
        };

        {
            let mut state = self.lock_state();
            if state.status != JobStatus::Accepting {
                return Err(JobError::NotAccepting {
                    id: self.inner.id,
                    status: state.status,
                }
                .into());
            }
            state.queue.push_back(QueueEntry::Item(item));
            state.item_count += 1;
        }

        self.inner.item_ready.notify_one();
        Ok(())
    }

    /// Declare that no more items will be added
    ///
    /// Idempotent. Until this is called the downloader keeps waiting for items of this job.
    pub fn finalize(&self) {
        let item_count = {
            let mut state = self.lock_state();
            if state.status != JobStatus::Accepting {
                return;
            }
            state.status = JobStatus::Finalized;
            state.queue.push_back(QueueEntry::End);
            state.item_count
        };

        if self.inner.total_size.is_none()
            && let Some(progress) = &self.inner.progress
        {
            progress.configure(ProgressMode::Determinate, item_count as u64);
        }

        tracing::debug!(job_id = %self.inner.id, items = item_count, "job finalized");
        self.inner.item_ready.notify_one();
    }

    /// Finalize, then stop the job as soon as possible
    ///
    /// The transfer in flight stops within one block; items still queued are discarded without
    /// a request. Completion still fires, so [`join`](Self::join) returns.
    pub fn cancel(&self) {
        self.finalize();
        {
            let mut state = self.lock_state();
            if state.status == JobStatus::Cancelled {
                return;
            }
            state.status = JobStatus::Cancelled;
        }
        tracing::info!(job_id = %self.inner.id, "job cancelled");
        self.inner.item_ready.notify_one();
    }

    /// Finalize and wait until every item has been processed
    ///
    /// Returns the failure map. Failures never raise.
    pub async fn join(&self) -> HashMap<String, Failure> {
        self.finalize();
        let mut rx = self.inner.done.subscribe();
        if rx.wait_for(|done| *done).await.is_err() {
            tracing::error!(job_id = %self.inner.id, "completion channel closed");
        }
        self.failures()
    }

    // ---- worker side ----

    /// Pop the next queue entry without waiting
    ///
    /// Items of a cancelled job are dropped here and never reach the network.
    pub(crate) fn try_next(&self) -> Option<QueueEntry> {
        let (entry, finished) = {
            let mut state = self.lock_state();
            if state.status == JobStatus::Cancelled {
                let before = state.queue.len();
                state.queue.retain(|e| matches!(e, QueueEntry::End));
                let discarded = before - state.queue.len();
                if discarded > 0 {
                    tracing::debug!(job_id = %self.inner.id, discarded, "dropping items of cancelled job");
                }
            }

            let entry = state.queue.pop_front()?;
            match entry {
                QueueEntry::Item(_) => state.pending += 1,
                QueueEntry::End => state.sentinel_seen = true,
            }
            (entry, state.sentinel_seen && state.pending == 0)
        };

        if finished {
            self.fire_done();
        }
        Some(entry)
    }

    /// Wait until [`try_next`](Self::try_next) may have something to return
    pub(crate) async fn item_ready(&self) {
        self.inner.item_ready.notified().await;
    }

    /// Put a consumed item back at the front of the queue
    ///
    /// Returns true when the sentinel had already been consumed, meaning the job left the
    /// scheduler and has to be enqueued again.
    pub(crate) fn unconsume(&self, item: WorkItem) -> bool {
        let mut state = self.lock_state();
        state.pending = state.pending.saturating_sub(1);
        state.queue.push_front(QueueEntry::Item(item));
        if state.sentinel_seen {
            state.sentinel_seen = false;
            state.queue.push_back(QueueEntry::End);
            true
        } else {
            false
        }
    }

    /// Mark one consumed item as handled; returns true if this completed the job
    pub(crate) fn item_done(&self) -> bool {
        let finished = {
            let mut state = self.lock_state();
            state.pending = state.pending.saturating_sub(1);
            state.sentinel_seen && state.pending == 0
        };

        if let Some(progress) = &self.inner.progress {
            if self.inner.total_size.is_none() {
                progress.report(1);
            }
            progress.advance_task_count();
        }

        if finished {
            self.fire_done();
        }
        finished
    }

    pub(crate) fn record_failure(&self, request_id: String, failure: Failure) {
        lock(&self.inner.failures).insert(request_id, failure);
    }

    pub(crate) fn record_completed(&self, path: PathBuf) {
        lock(&self.inner.completed).push(path);
    }

    /// Reset the per-file reporter for a new transfer
    pub(crate) fn begin_file(&self, content_length: Option<u64>, block_size: usize) {
        if let Some(progress) = &self.inner.file_progress {
            match content_length {
                Some(len) if len > 0 => progress.configure(ProgressMode::Determinate, len),
                _ => progress.configure(ProgressMode::Indeterminate, block_size as u64),
            }
        }
    }

    /// Account for `delta` bytes written to a destination
    pub(crate) fn report_bytes(&self, delta: u64) {
        if let Some(progress) = &self.inner.file_progress {
            progress.report(delta);
        }
        if self.inner.total_size.is_some()
            && let Some(progress) = &self.inner.progress
        {
            progress.report(delta);
        }
    }

    /// Cancel and complete the job regardless of outstanding work
    ///
    /// Used when the downloader shuts down with the job still scheduled.
    pub(crate) fn abandon(&self) {
        {
            let mut state = self.lock_state();
            state.status = JobStatus::Cancelled;
            state.queue.clear();
            state.pending = 0;
            state.sentinel_seen = true;
        }
        self.fire_done();
    }

    fn fire_done(&self) {
        if !self.inner.done.send_replace(true) {
            tracing::debug!(
                job_id = %self.inner.id,
                failures = lock(&self.inner.failures).len(),
                "job complete"
            );
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, JobState> {
        lock(&self.inner.state)
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Job {}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("priority", &self.inner.priority)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
