//! Priority buckets of jobs waiting for the worker

use std::collections::{BTreeMap, VecDeque};

use crate::job::Job;

/// Jobs owned by one downloader
///
/// Buckets are keyed by priority; within a bucket jobs run in arrival order, except that a
/// preempted job goes back to the front of its bucket.
#[derive(Default)]
pub(crate) struct Scheduler {
    buckets: BTreeMap<i32, VecDeque<Job>>,
    /// Job the worker is currently taking items from
    pub(crate) active: Option<Job>,
}

impl Scheduler {
    /// Append `job` to its priority bucket
    pub(crate) fn push_back(&mut self, job: Job) {
        self.buckets.entry(job.priority()).or_default().push_back(job);
    }

    /// Put `job` at the head of its priority bucket
    pub(crate) fn push_front(&mut self, job: Job) {
        self.buckets.entry(job.priority()).or_default().push_front(job);
    }

    /// Take the first job of the highest non-empty bucket
    ///
    /// Empty buckets met on the way are discarded.
    pub(crate) fn select_next_job(&mut self) -> Option<Job> {
        while let Some(mut entry) = self.buckets.last_entry() {
            if let Some(job) = entry.get_mut().pop_front() {
                if entry.get().is_empty() {
                    entry.remove();
                }
                return Some(job);
            }
            entry.remove();
        }
        None
    }

    /// Whether `job` would preempt the active job
    pub(crate) fn outranks_active(&self, job: &Job) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| job.priority() > active.priority())
    }

    /// Return the active job to the front of its bucket
    pub(crate) fn requeue_active(&mut self) -> Option<Job> {
        let job = self.active.take()?;
        self.push_front(job.clone());
        Some(job)
    }

    /// Remove and return every job, the active one first
    pub(crate) fn drain(&mut self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.active.take().into_iter().collect();
        while let Some(job) = self.select_next_job() {
            jobs.push(job);
        }
        jobs
    }

    /// Number of jobs waiting in buckets (excluding the active job)
    pub(crate) fn waiting(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }
}
