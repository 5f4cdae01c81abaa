//! The single-flight drain loop.

use crate::queue::JobQueue;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use romforge_core::JobId;
use romforge_core::runner::JobRunner;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{error, info};

/// Queue plus the worker flag, guarded together.
///
/// Enqueue-then-test-and-set and empty-check-then-clear both happen under
/// this one lock, so a job can never be left behind with no worker running.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub(crate) queue: JobQueue,
    pub(crate) worker_active: bool,
}

pub(crate) type SharedState = Arc<Mutex<QueueState>>;

pub(crate) fn lock(state: &SharedState) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle notifications from the worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    JobStarted {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    JobFinished {
        job_id: JobId,
        success: bool,
        at: DateTime<Utc>,
    },
    /// The queue drained and the worker stopped.
    Idle { at: DateTime<Utc> },
}

/// Drains the queue one job at a time.
pub(crate) struct Worker {
    state: SharedState,
    runner: Arc<dyn JobRunner>,
    events: broadcast::Sender<WorkerEvent>,
}

impl Worker {
    pub(crate) fn new(
        state: SharedState,
        runner: Arc<dyn JobRunner>,
        events: broadcast::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            state,
            runner,
            events,
        }
    }

    /// Run until the queue is empty, then clear the worker flag.
    ///
    /// The caller must have set the flag before spawning this.
    pub(crate) async fn run(self) {
        info!("Worker started");

        loop {
            let job = {
                let mut state = lock(&self.state);
                match state.queue.pop() {
                    Some(job) => job,
                    None => {
                        state.worker_active = false;
                        break;
                    }
                }
            };

            let job_id = job.id;
            let _ = self.events.send(WorkerEvent::JobStarted {
                job_id,
                at: Utc::now(),
            });

            // A panicking pipeline must not take the worker down with the flag still set.
            let success = match AssertUnwindSafe(self.runner.run(job)).catch_unwind().await {
                Ok(outcome) => outcome.is_success(),
                Err(_) => {
                    error!(job_id = %job_id, "Job runner panicked");
                    false
                }
            };

            let _ = self.events.send(WorkerEvent::JobFinished {
                job_id,
                success,
                at: Utc::now(),
            });
        }

        info!("Queue drained; worker idle");
        let _ = self.events.send(WorkerEvent::Idle { at: Utc::now() });
    }
}

