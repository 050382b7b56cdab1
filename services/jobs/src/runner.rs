//! Delayed, retrying job runner
//!
//! A min-heap of scheduled jobs guarded by a std mutex (never held across
//! an await), a notify for wakeups, and N worker loops. Coalescing and
//! re-scheduling use a generation counter per key: the heap keeps stale
//! entries, workers drop any entry whose generation no longer matches the
//! pending map.

use crate::job::{Job, JobError, JobHandler, Queue};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Runner tuning; defaults match the per-queue policies
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub workers: usize,
    pub persist_attempts: u32,
    pub persist_backoff: Duration,
    pub mirror_attempts: u32,
    pub mirror_backoff: Duration,
    pub finalize_attempts: u32,
    pub finalize_backoff: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
    pub finalize_failed_retention: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            persist_attempts: 3,
            persist_backoff: Duration::seconds(2),
            mirror_attempts: 3,
            mirror_backoff: Duration::seconds(2),
            finalize_attempts: 5,
            finalize_backoff: Duration::seconds(5),
            completed_retention: Duration::hours(1),
            failed_retention: Duration::hours(24),
            finalize_failed_retention: Duration::days(7),
        }
    }
}

/// Counter snapshot for logs and health reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerStats {
    pub processed: u64,
    pub retried: u64,
    pub dead: u64,
    pub pending: usize,
}

/// One heap entry; ordered so the earliest run time pops first
struct Scheduled {
    run_at: DateTime<Utc>,
    seq: u64,
    generation: u64,
    job: Job,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the soonest job
        other
            .run_at
            .cmp(&self.run_at)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct RunnerState {
    heap: BinaryHeap<Scheduled>,
    /// key -> generation of the live schedule for that key
    pending: HashMap<String, u64>,
    completed: HashMap<String, DateTime<Utc>>,
    failed: HashMap<String, (Queue, DateTime<Utc>)>,
    next_seq: u64,
    next_generation: u64,
}

/// The runner itself; share via `Arc`
pub struct JobRunner {
    state: Mutex<RunnerState>,
    notify: Notify,
    config: RunnerConfig,
    processed: AtomicU64,
    retried: AtomicU64,
    dead: AtomicU64,
}

impl JobRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            state: Mutex::new(RunnerState::default()),
            notify: Notify::new(),
            config,
            processed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            dead: AtomicU64::new(0),
        }
    }

    fn policy(&self, queue: Queue) -> (u32, Duration) {
        match queue {
            Queue::PersistBid => (self.config.persist_attempts, self.config.persist_backoff),
            Queue::UpdateAuctionMirror => {
                (self.config.mirror_attempts, self.config.mirror_backoff)
            }
            Queue::FinalizeAuction => {
                (self.config.finalize_attempts, self.config.finalize_backoff)
            }
        }
    }

    /// Submit a job to run immediately
    ///
    /// Returns `false` when a job with the same key is already pending
    /// (the submissions coalesce).
    pub fn submit(&self, queue: Queue, key: &str, payload: serde_json::Value) -> bool {
        self.submit_at(queue, key, payload, Utc::now())
    }

    /// Submit a job to run at a given time, coalescing on the key
    pub fn submit_at(
        &self,
        queue: Queue,
        key: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.lock().expect("runner poisoned");
        if state.pending.contains_key(key) {
            debug!(%queue, key, "job submission coalesced");
            return false;
        }
        Self::push_locked(&mut state, queue, key, payload, run_at, 1, None);
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Re-schedule the job for a key, superseding any pending entry
    ///
    /// Used when an extension moves an auction's finalize time. The
    /// attempt counter restarts.
    pub fn reschedule(
        &self,
        queue: Queue,
        key: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().expect("runner poisoned");
        Self::push_locked(&mut state, queue, key, payload, run_at, 1, None);
        drop(state);
        self.notify.notify_one();
    }

    /// Push an entry; `keep_generation` retains an existing claim on the
    /// key (retries), otherwise a fresh generation supersedes it
    fn push_locked(
        state: &mut RunnerState,
        queue: Queue,
        key: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
        attempt: u32,
        keep_generation: Option<u64>,
    ) {
        let generation = match keep_generation {
            Some(generation) => generation,
            None => {
                state.next_generation += 1;
                let generation = state.next_generation;
                state.pending.insert(key.to_string(), generation);
                generation
            }
        };
        state.next_seq += 1;
        let seq = state.next_seq;
        state.heap.push(Scheduled {
            run_at,
            seq,
            generation,
            job: Job {
                queue,
                key: key.to_string(),
                payload,
                attempt,
                run_at,
                submitted_at: Utc::now(),
            },
        });
    }

    /// Spawn the worker loops plus the retention pruner
    pub fn start(self: &Arc<Self>, handler: Arc<dyn JobHandler>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for _ in 0..self.config.workers.max(1) {
            let runner = Arc::clone(self);
            let handler = Arc::clone(&handler);
            handles.push(tokio::spawn(async move {
                runner.worker_loop(handler).await;
            }));
        }

        let runner = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                runner.prune(Utc::now());
            }
        }));

        handles
    }

    async fn worker_loop(self: Arc<Self>, handler: Arc<dyn JobHandler>) {
        enum Next {
            Run(Box<Scheduled>),
            Sleep(std::time::Duration),
            Idle,
        }

        loop {
            let next = {
                let mut state = self.state.lock().expect("runner poisoned");
                let now = Utc::now();
                loop {
                    if state.heap.is_empty() {
                        break Next::Idle;
                    }
                    let (run_at, is_current) = {
                        let top = state.heap.peek().expect("non-empty heap");
                        (
                            top.run_at,
                            state.pending.get(&top.job.key).copied() == Some(top.generation),
                        )
                    };
                    if !is_current {
                        state.heap.pop();
                        continue;
                    }
                    if run_at <= now {
                        let due = state.heap.pop().expect("non-empty heap");
                        break Next::Run(Box::new(due));
                    }
                    let wait = (run_at - now)
                        .to_std()
                        .unwrap_or(std::time::Duration::from_millis(1));
                    break Next::Sleep(wait);
                }
            };

            match next {
                Next::Idle => self.notify.notified().await,
                Next::Sleep(wait) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Next::Run(due) => self.execute(*due, handler.as_ref()).await,
            }
        }
    }

    async fn execute(&self, due: Scheduled, handler: &dyn JobHandler) {
        let Scheduled {
            generation, job, ..
        } = due;
        let result = handler.handle(&job).await;

        let mut state = self.state.lock().expect("runner poisoned");
        // A reschedule during execution supersedes whatever happened here
        let still_current = state.pending.get(&job.key).copied() == Some(generation);

        match result {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                if still_current {
                    state.pending.remove(&job.key);
                }
                state.completed.insert(job.key.clone(), Utc::now());
                debug!(queue = %job.queue, key = %job.key, attempt = job.attempt, "job done");
            }
            Err(_) if !still_current => {
                debug!(queue = %job.queue, key = %job.key, "job superseded mid-flight");
            }
            Err(JobError::RetryAt(at)) => {
                self.retried.fetch_add(1, Ordering::Relaxed);
                let run_at = at.max(Utc::now());
                Self::push_locked(
                    &mut state,
                    job.queue,
                    &job.key,
                    job.payload,
                    run_at,
                    job.attempt,
                    Some(generation),
                );
                debug!(key = %job.key, %run_at, "job re-armed");
            }
            Err(JobError::Transient(reason)) => {
                let (max_attempts, backoff) = self.policy(job.queue);
                if job.attempt >= max_attempts {
                    self.dead.fetch_add(1, Ordering::Relaxed);
                    state.pending.remove(&job.key);
                    state
                        .failed
                        .insert(job.key.clone(), (job.queue, Utc::now()));
                    error!(
                        queue = %job.queue,
                        key = %job.key,
                        attempts = job.attempt,
                        reason = %reason,
                        "job exhausted retries"
                    );
                } else {
                    self.retried.fetch_add(1, Ordering::Relaxed);
                    let shift = (job.attempt - 1).min(16);
                    let delay = backoff * (1i32 << shift);
                    let run_at = Utc::now() + delay;
                    warn!(
                        queue = %job.queue,
                        key = %job.key,
                        attempt = job.attempt,
                        reason = %reason,
                        "job failed, backing off"
                    );
                    Self::push_locked(
                        &mut state,
                        job.queue,
                        &job.key,
                        job.payload,
                        run_at,
                        job.attempt + 1,
                        Some(generation),
                    );
                }
            }
            Err(JobError::Permanent(reason)) => {
                self.dead.fetch_add(1, Ordering::Relaxed);
                state.pending.remove(&job.key);
                state
                    .failed
                    .insert(job.key.clone(), (job.queue, Utc::now()));
                error!(queue = %job.queue, key = %job.key, reason = %reason, "job failed permanently");
            }
        }

        drop(state);
        self.notify.notify_one();
    }

    /// Whether a key currently has a live schedule
    pub fn is_pending(&self, key: &str) -> bool {
        self.state
            .lock()
            .expect("runner poisoned")
            .pending
            .contains_key(key)
    }

    /// Drop completed/failed records past their retention windows
    pub fn prune(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().expect("runner poisoned");
        let completed_cutoff = now - self.config.completed_retention;
        state.completed.retain(|_, at| *at > completed_cutoff);

        let failed_retention = self.config.failed_retention;
        let finalize_retention = self.config.finalize_failed_retention;
        state.failed.retain(|_, (queue, at)| {
            let retention = match queue {
                Queue::FinalizeAuction => finalize_retention,
                _ => failed_retention,
            };
            *at > now - retention
        });
    }

    pub fn stats(&self) -> RunnerStats {
        let state = self.state.lock().expect("runner poisoned");
        RunnerStats {
            processed: self.processed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            pending: state.pending.len(),
        }
    }
}
