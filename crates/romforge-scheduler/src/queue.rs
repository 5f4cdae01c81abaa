//! In-memory build queue.
//!
//! Positions are 1-based in every operation, matching what requesters see in
//! the queue listing.

use romforge_core::{DevicePath, Error, Job, RequesterId, Result, SourceRef};
use serde::Serialize;
use std::collections::VecDeque;

/// Listing view of a pending job; targets are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub requester: RequesterId,
    pub source: SourceRef,
    pub device_path: DevicePath,
}

impl From<&Job> for QueueEntry {
    fn from(job: &Job) -> Self {
        Self {
            requester: job.requester,
            source: job.source.clone(),
            device_path: job.device_path.clone(),
        }
    }
}

/// Pending jobs in execution order.
///
/// Not synchronized on its own; the orchestrator keeps it behind the same
/// lock as the worker flag.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job and return its position.
    pub fn enqueue(&mut self, job: Job) -> usize {
        self.jobs.push_back(job);
        self.jobs.len()
    }

    /// Remove the job at `position` if `requester` owns it.
    pub fn cancel(&mut self, position: usize, requester: RequesterId) -> Result<Job> {
        let index = self.index(position)?;
        if !self.jobs[index].is_owned_by(requester) {
            return Err(Error::NotOwner { position });
        }
        self.jobs
            .remove(index)
            .ok_or(Error::OutOfRange { position, len: self.jobs.len() })
    }

    /// Move the job at `from` so that it ends up at `to`.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        let from_index = self.index(from)?;
        let to_index = self.index(to)?;
        if let Some(job) = self.jobs.remove(from_index) {
            self.jobs.insert(to_index, job);
        }
        Ok(())
    }

    /// Drop every pending job, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.jobs.len();
        self.jobs.clear();
        removed
    }

    pub fn list(&self) -> Vec<QueueEntry> {
        self.jobs.iter().map(QueueEntry::from).collect()
    }

    /// Take the head job for execution.
    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn index(&self, position: usize) -> Result<usize> {
        if position == 0 || position > self.jobs.len() {
            return Err(Error::OutOfRange {
                position,
                len: self.jobs.len(),
            });
        }
        Ok(position - 1)
    }
}
