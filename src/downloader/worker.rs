//! The download worker loop
//!
//! Per item: pop the next entry of the active job, open its output, submit the request,
//! read the response head, submit the next request when pipelining, then stream the body.
//! Items stopped by preemption or shutdown are put back at the head of their job and resume
//! later through a range request.

use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::io::AsyncWriteExt;

use super::Shared;
use super::request::{Target, UrlTemplate};
use crate::config::{DownloadConfig, PartialFilePolicy, RetryConfig, ServerConfig};
use crate::copier::{self, CopyOutcome};
use crate::http::{Framing, HttpConnection, Request};
use crate::job::{Destination, Job, QueueEntry, WorkItem};
use crate::types::{Event, Failure};

/// Whether looking for the next item may wait for producers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Wait {
    /// Wait for items, jobs or shutdown
    Block,
    /// Return `None` instead of waiting
    Poll,
}

/// A request that has been submitted on the connection and awaits its response
struct InFlight {
    job: Job,
    item: WorkItem,
    request_id: String,
    target: Target,
    expected_status: u16,
    /// Existing partial content must be discarded once the full body starts arriving
    truncate: bool,
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    server: ServerConfig,
    config: DownloadConfig,
    template: UrlTemplate,
    conn: HttpConnection,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        server: ServerConfig,
        config: DownloadConfig,
        retry: RetryConfig,
    ) -> Self {
        let conn = HttpConnection::new(
            &server,
            config.user_agent.clone(),
            config.connect_timeout,
            retry,
        );
        Self {
            shared,
            template: UrlTemplate::new(server.url_template.clone()),
            server,
            config,
            conn,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut pending: Option<InFlight> = None;

        loop {
            let current = match pending.take() {
                Some(current) => current,
                None => match self.next_request(Wait::Block, None).await {
                    Some(current) => current,
                    None => break,
                },
            };

            pending = self.handle(current).await;

            if self.shared.shutdown.is_cancelled() {
                if let Some(next) = pending.take() {
                    self.conn.reset();
                    self.requeue(next).await;
                }
                break;
            }
        }

        self.conn.reset();
        let leftovers = self.shared.scheduler.lock().await.drain();
        for job in leftovers {
            job.abandon();
            self.job_completed(&job);
        }

        tracing::info!(host = %self.server.host, "downloader stopped");
        self.shared.emit(Event::Shutdown);
    }

    /// Find the next work item and submit its request
    ///
    /// Returns `None` on shutdown, or in [`Wait::Poll`] mode when nothing is immediately
    /// available. An item writing to `busy` is left queued until that transfer is finished.
    async fn next_request(&mut self, wait: Wait, busy: Option<&Path>) -> Option<InFlight> {
        loop {
            if self.shared.shutdown.is_cancelled() {
                return None;
            }

            let Some(job) = self.active_job().await else {
                if wait == Wait::Poll {
                    return None;
                }
                tokio::select! {
                    _ = self.shared.wakeup.notified() => {}
                    _ = self.shared.shutdown.cancelled() => return None,
                }
                continue;
            };

            match job.try_next() {
                Some(QueueEntry::Item(item)) => {
                    if let Some(busy) = busy
                        && Target::resolve(&item.destination, job.output_dir()).as_deref()
                            == Some(busy)
                    {
                        tracing::debug!(
                            job_id = %job.id(),
                            path = %busy.display(),
                            "destination in use, not pipelining"
                        );
                        if job.unconsume(item) {
                            self.shared.scheduler.lock().await.push_front(job);
                        }
                        return None;
                    }
                    if let Some(request) = self.submit(job, item).await {
                        return Some(request);
                    }
                }
                Some(QueueEntry::End) => {
                    {
                        let mut scheduler = self.shared.scheduler.lock().await;
                        if scheduler.active.as_ref() == Some(&job) {
                            scheduler.active = None;
                        }
                    }
                    tracing::debug!(job_id = %job.id(), "end of job reached");
                    if job.is_complete() {
                        self.job_completed(&job);
                    }
                }
                None => {
                    if wait == Wait::Poll {
                        return None;
                    }
                    tokio::select! {
                        _ = job.item_ready() => {}
                        _ = self.shared.wakeup.notified() => {}
                        _ = self.shared.shutdown.cancelled() => return None,
                    }
                }
            }
        }
    }

    /// Current job, after honoring a pending interrupt
    async fn active_job(&mut self) -> Option<Job> {
        let mut scheduler = self.shared.scheduler.lock().await;

        if self.shared.interrupt.swap(false, Ordering::SeqCst)
            && let Some(job) = scheduler.requeue_active()
        {
            tracing::info!(job_id = %job.id(), priority = job.priority(), "job preempted");
            self.shared.emit(Event::JobPreempted {
                job: job.id(),
                priority: job.priority(),
            });
        }

        if scheduler.active.is_none() {
            scheduler.active = scheduler.select_next_job();
            if let Some(job) = &scheduler.active {
                tracing::debug!(
                    job_id = %job.id(),
                    priority = job.priority(),
                    items = job.item_count(),
                    "job selected"
                );
            }
        }

        scheduler.active.clone()
    }

    /// Open the item's output and submit its request
    async fn submit(&mut self, job: Job, item: WorkItem) -> Option<InFlight> {
        let request_id = match self
            .template
            .render(&item.params, item.destination.file_name())
        {
            Ok(path) => path,
            Err(e) => {
                let request_id = format!("{} {:?}", self.template, item.params);
                self.reject(&job, request_id, e.to_string());
                return None;
            }
        };

        let opened = Target::open(&item.destination, job.output_dir(), &self.config)
            .and_then(|target| Ok((target.existing_len()?, target)));
        let (existing, target) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.reject(&job, request_id, e.to_string());
                return None;
            }
        };

        let (request, expected_status, truncate) = if existing > 0 && self.server.supports_range
        {
            (Request::get(&request_id).with_range_from(existing), 206, false)
        } else {
            (Request::get(&request_id), 200, existing > 0)
        };

        self.conn.send(&request).await;

        tracing::debug!(
            job_id = %job.id(),
            request_id = %request_id,
            resume_from = request.range_from,
            "request submitted"
        );
        self.shared.emit(Event::ItemStarted {
            job: job.id(),
            request_id: request_id.clone(),
            resumed_from: request.range_from,
        });

        Some(InFlight {
            job,
            item,
            request_id,
            target,
            expected_status,
            truncate,
        })
    }

    /// Read the response to `current` and stream its body
    ///
    /// Returns the pipelined request submitted meanwhile, if any.
    async fn handle(&mut self, mut current: InFlight) -> Option<InFlight> {
        let head = tokio::select! {
            head = self.conn.read_head() => head,
            _ = self.shared.shutdown.cancelled() => {
                self.conn.reset();
                self.requeue(current).await;
                return None;
            }
        };

        let head = match head {
            Ok(head) => head,
            Err(e) => {
                tracing::error!(error = %e, host = %self.server.host, "connection failed");
                self.conn.reset();
                self.fail(current, Failure::Transfer(e.to_string()));
                return None;
            }
        };

        let next = if self.server.supports_pipelining {
            self.next_request(Wait::Poll, current.target.final_path())
                .await
        } else {
            None
        };

        if head.status != current.expected_status {
            let reusable = head.keep_alive
                && match self.conn.body(&head) {
                    Ok(mut body) => body.drain().await.is_ok() && body.is_done(),
                    Err(_) => false,
                };
            if reusable {
                self.conn.complete(true);
            } else {
                self.conn.abandon();
            }
            self.fail(current, Failure::Status(head.status));
            return next;
        }

        if current.truncate
            && let Err(e) = current.target.truncate()
        {
            self.conn.abandon();
            self.fail(current, Failure::Transfer(e.to_string()));
            return next;
        }

        let mut writer = match current.target.async_writer() {
            Ok(writer) => writer,
            Err(e) => {
                self.conn.abandon();
                self.fail(current, Failure::Transfer(e.to_string()));
                return next;
            }
        };

        let content_length = match head.framing {
            Framing::Length(n) => Some(n),
            _ => None,
        };
        current.job.begin_file(content_length, self.config.block_size);

        let job = current.job.clone();
        let shared = self.shared.clone();
        let block_size = self.config.block_size;
        let (copied, body_done) = match self.conn.body(&head) {
            Ok(mut body) => {
                let copied = copier::copy(
                    &mut body,
                    &mut writer,
                    |n| job.report_bytes(n),
                    || {
                        shared.interrupt.load(Ordering::SeqCst)
                            || job.is_cancelled()
                            || shared.shutdown.is_cancelled()
                    },
                    block_size,
                )
                .await;
                (copied, body.is_done())
            }
            Err(e) => (Err(std::io::Error::other(e.to_string())), false),
        };

        // Persist what arrived even when the copy stopped early, so it can be resumed
        let flushed = writer.flush().await;
        drop(writer);
        let outcome = copied.and_then(|outcome| flushed.map(|()| outcome));

        match outcome {
            Ok(CopyOutcome::Complete(bytes)) => {
                self.conn.complete(body_done && head.keep_alive);
                self.deliver(current, bytes);
                next
            }
            Ok(CopyOutcome::Cancelled(bytes)) => {
                // The rest of the body is still on the wire
                self.conn.reset();
                if let Some(next) = next {
                    self.requeue(next).await;
                }
                if current.job.is_cancelled() {
                    self.discard(current, bytes);
                } else {
                    tracing::debug!(
                        job_id = %current.job.id(),
                        request_id = %current.request_id,
                        bytes,
                        "transfer interrupted"
                    );
                    self.requeue(current).await;
                }
                None
            }
            Err(e) => {
                self.conn.abandon();
                self.fail(current, Failure::Transfer(e.to_string()));
                next
            }
        }
    }

    /// Hand a completed transfer to its destination
    fn deliver(&mut self, current: InFlight, bytes: u64) {
        let InFlight {
            job,
            item,
            request_id,
            target,
            ..
        } = current;

        let delivered: std::io::Result<()> = match target {
            Target::Part {
                file,
                part_path,
                final_path,
            } => {
                drop(file);
                std::fs::rename(&part_path, &final_path).map(|()| job.record_completed(final_path))
            }
            Target::Staging { mut file } => match item.destination {
                Destination::Sink(callback) => {
                    file.seek(SeekFrom::Start(0)).map(|_| callback(file))
                }
                Destination::Path(_) => Err(std::io::Error::other(
                    "staging file produced for a path destination",
                )),
            },
        };

        match delivered {
            Ok(()) => {
                tracing::debug!(job_id = %job.id(), request_id = %request_id, bytes, "item completed");
                self.shared.emit(Event::ItemCompleted {
                    job: job.id(),
                    request_id,
                    bytes,
                });
            }
            Err(e) => {
                self.record(&job, request_id, Failure::Transfer(e.to_string()));
            }
        }
        self.item_finished(&job);
    }

    /// Drop the in-flight item of a cancelled job
    fn discard(&mut self, current: InFlight, bytes: u64) {
        let InFlight {
            job,
            request_id,
            target,
            ..
        } = current;

        tracing::debug!(job_id = %job.id(), request_id = %request_id, bytes, "transfer cancelled");

        if self.config.cancelled_partials == PartialFilePolicy::Delete
            && let Some(part) = target.part_path().map(ToOwned::to_owned)
        {
            drop(target);
            if let Err(e) = std::fs::remove_file(&part) {
                tracing::warn!(path = %part.display(), error = %e, "failed to remove partial file");
            }
        }
        self.item_finished(&job);
    }

    /// Put an in-flight item back at the head of its job
    async fn requeue(&mut self, current: InFlight) {
        let InFlight {
            job,
            item,
            request_id,
            ..
        } = current;

        self.shared.emit(Event::ItemRequeued {
            job: job.id(),
            request_id,
        });
        if job.unconsume(item) {
            self.shared.scheduler.lock().await.push_front(job);
        }
    }

    /// Record a failure for an item whose request was never submitted
    fn reject(&mut self, job: &Job, request_id: String, reason: String) {
        self.record(job, request_id, Failure::Transfer(reason));
        self.item_finished(job);
    }

    /// Record a failure for a submitted item; its partial file stays on disk
    fn fail(&mut self, current: InFlight, failure: Failure) {
        let InFlight { job, request_id, .. } = current;
        self.record(&job, request_id, failure);
        self.item_finished(&job);
    }

    fn record(&self, job: &Job, request_id: String, failure: Failure) {
        tracing::warn!(
            job_id = %job.id(),
            request_id = %request_id,
            failure = %failure,
            "item failed"
        );
        self.shared.emit(Event::ItemFailed {
            job: job.id(),
            request_id: request_id.clone(),
            failure: failure.clone(),
        });
        job.record_failure(request_id, failure);
    }

    fn item_finished(&self, job: &Job) {
        if job.item_done() {
            self.job_completed(job);
        }
    }

    fn job_completed(&self, job: &Job) {
        let failures = job.failures().len();
        tracing::info!(job_id = %job.id(), failures, "job completed");
        self.shared.emit(Event::JobCompleted {
            job: job.id(),
            failures,
        });
    }
}
