//! Worker pool: threads that claim jobs from the queue and run them through
//! the action executor.

pub mod event;
pub mod pool;

pub use event::WorkerEvent;
pub use pool::{WorkerPool, WorkerSettings};

// Re-export crossbeam_channel so callers can select over worker events.
pub use crossbeam_channel;
