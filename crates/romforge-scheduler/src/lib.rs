//! Build queue and single-flight worker for romforge.
//!
//! Jobs are held in an in-memory FIFO and executed strictly one at a time
//! against the shared workspace. Nothing is persisted across restarts.

pub mod orchestrator;
pub mod queue;
pub mod worker;

pub use orchestrator::BuildOrchestrator;
pub use queue::{JobQueue, QueueEntry};
pub use worker::WorkerEvent;
