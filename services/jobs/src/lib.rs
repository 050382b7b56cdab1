//! Background Job Runner
//!
//! At-least-once execution of the write-down pipelines: bid persistence,
//! auction-mirror updates, and finalization. Jobs carry natural keys so
//! redelivery coalesces, retries back off exponentially per queue, and
//! delayed submission drives the primary finalization trigger.
//!
//! Jobs never make admission decisions: by the time one exists, the hot
//! store has already committed the truth it writes down.

pub mod job;
pub mod runner;

pub use job::{Job, JobError, JobHandler, Queue};
pub use runner::{JobRunner, RunnerConfig, RunnerStats};
