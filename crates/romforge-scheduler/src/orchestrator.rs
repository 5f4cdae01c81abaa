//! Build orchestrator: submission, queue management and the worker kick.

use crate::queue::QueueEntry;
use crate::worker::{QueueState, SharedState, Worker, WorkerEvent, lock};
use romforge_config::SourceSettings;
use romforge_core::runner::JobRunner;
use romforge_core::{JobRequest, RequesterId, Result};
use romforge_notify::LogAggregator;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::info;

const EVENT_CAPACITY: usize = 64;

/// Owns the queue and runs queued jobs one at a time.
///
/// Submission returns as soon as the job is queued. If no worker is active
/// one is spawned; otherwise the running worker picks the job up after the
/// jobs ahead of it. Queue operations never wait for a running job.
///
/// Authorization of the administrative operations ([`reorder`] and
/// [`clear`]) is the caller's responsibility.
///
/// [`reorder`]: BuildOrchestrator::reorder
/// [`clear`]: BuildOrchestrator::clear
#[derive(Clone)]
pub struct BuildOrchestrator {
    state: SharedState,
    runner: Arc<dyn JobRunner>,
    logs: LogAggregator,
    allowed_prefixes: Arc<[String]>,
    events: broadcast::Sender<WorkerEvent>,
}

impl BuildOrchestrator {
    pub fn new(runner: Arc<dyn JobRunner>, logs: LogAggregator, sources: &SourceSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            runner,
            logs,
            allowed_prefixes: sources.allowed_prefixes.clone().into(),
            events,
        }
    }

    /// Validate and queue a build, returning its 1-based position.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, request: JobRequest) -> Result<usize> {
        let job = request.validate(&self.allowed_prefixes[..])?;
        let job_id = job.id;
        let requester = job.requester;

        let (position, start_worker) = {
            let mut state = lock(&self.state);
            let position = state.queue.enqueue(job);
            let start_worker = !state.worker_active;
            state.worker_active = true;
            (position, start_worker)
        };

        info!(job_id = %job_id, requester = %requester, position, "Job queued");

        if start_worker {
            let worker = Worker::new(self.state.clone(), self.runner.clone(), self.events.clone());
            tokio::spawn(worker.run());
        }

        Ok(position)
    }

    pub fn list_queue(&self) -> Vec<QueueEntry> {
        lock(&self.state).queue.list()
    }

    /// Remove a pending job owned by `requester`.
    pub fn cancel(&self, position: usize, requester: RequesterId) -> Result<()> {
        let job = lock(&self.state).queue.cancel(position, requester)?;
        info!(job_id = %job.id, requester = %requester, position, "Job cancelled");
        Ok(())
    }

    pub fn reorder(&self, from: usize, to: usize) -> Result<()> {
        lock(&self.state).queue.reorder(from, to)?;
        info!(from, to, "Job moved");
        Ok(())
    }

    /// Drop all pending jobs. The running job, if any, is unaffected.
    pub fn clear(&self) -> usize {
        let removed = lock(&self.state).queue.clear();
        info!(removed, "Queue cleared");
        removed
    }

    /// Recent output of the executing job.
    pub fn recent_logs(&self) -> Option<Vec<String>> {
        self.logs.recent()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).worker_active
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }
}
