//! Finalization Coordinator
//!
//! End-of-auction settlement with two independent triggers and one
//! idempotent commit. Trigger A is a delayed `finalize-{auction}` job at
//! the end time, re-scheduled on every extension; trigger B is the
//! hot-store end-of-life notification. However many triggers fire,
//! exactly one caller observes the finalize commit, and only that caller
//! publishes `auction-ended`.

pub mod activation;
pub mod finalizer;
pub mod handler;
pub mod recovery;
pub mod scheduler;

pub use activation::spawn_activation_loop;
pub use finalizer::{FinalizationMirror, Finalizer, SettleError, Settlement};
pub use handler::WriteDownHandler;
pub use recovery::{recover, ActiveAuctionSource, RecoveryReport};
pub use scheduler::{FinalizationScheduler, FinalizePayload};
