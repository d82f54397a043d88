//! Dispatcher: turns time-stamped schedule requests into executing worker
//! tasks while respecting the global concurrency ceiling.
//!
//! Grounded in `src/downloader/queue_processor.rs`'s semaphore-gated spawn
//! loop and `original_source/downloader.py::Downloader.run`.

mod queue;

pub use queue::DispatchQueue;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::types::DownloadResult;
use crate::worker;

/// A counting semaphore with an explicit in-use counter, so saturation can
/// be logged without reaching into the semaphore's private state (spec.md
/// §9 "shared semaphore internals").
pub struct ConcurrencyGate {
    semaphore: Semaphore,
    limit: usize,
    in_use: AtomicUsize,
}

impl ConcurrencyGate {
    /// A gate with `limit` permits available (1 <= limit <= 1000 per spec.md §3).
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Semaphore::new(limit),
            limit,
            in_use: AtomicUsize::new(0),
        })
    }

    /// Acquire a permit, blocking until one is available. Returns the
    /// permit together with whether the gate was already saturated at the
    /// instant this caller was admitted.
    pub async fn acquire(self: &Arc<Self>) -> (tokio::sync::SemaphorePermit<'_>, bool) {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("gate semaphore never closes");
        let in_use = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        (permit, in_use >= self.limit)
    }

    /// Release bookkeeping for a held permit. Called when the permit guard drops.
    pub fn release(&self) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
    }

    /// Configured concurrency ceiling.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Current count of workers holding the gate (P2 concurrency-ceiling property).
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }
}

/// Owns the dispatch queue and the global concurrency gate; admits work
/// from scheduler agents and launches download workers as their scheduled
/// time arrives.
pub struct Dispatcher {
    queue: DispatchQueue,
    gate: Arc<ConcurrencyGate>,
    client: reqwest::Client,
    upstream_url: String,
    local_root: std::path::PathBuf,
    /// Whether the feed renderer should pretty-print `rss.xml`. Threaded
    /// through from `run`'s `beautify` parameter (spec.md §4.1).
    beautify: std::sync::atomic::AtomicBool,
}

/// How far behind real time a job can run before it's logged as late.
const LATE_THRESHOLD_SECS: i64 = 5;
/// Only announce an upcoming job when it's further out than this...
const ANNOUNCE_THRESHOLD_SECS: i64 = 30;
/// ...and only every this many seconds, to avoid spamming the log.
const ANNOUNCE_INTERVAL_SECS: i64 = 30;

impl Dispatcher {
    /// Create a dispatcher bound to one upstream origin and local root,
    /// with `download_limit` concurrent download permits.
    pub fn new(download_limit: usize, upstream_url: String, local_root: std::path::PathBuf) -> Arc<Self> {
        Arc::new(Self {
            queue: DispatchQueue::new(),
            gate: ConcurrencyGate::new(download_limit),
            client: reqwest::Client::new(),
            upstream_url,
            local_root,
            beautify: std::sync::atomic::AtomicBool::new(true),
        })
    }

    /// Whether `rss.xml` output should be pretty-printed.
    pub fn beautify(&self) -> bool {
        self.beautify.load(Ordering::Relaxed)
    }

    /// Enqueue a job to run at `run_at` (epoch seconds). Thread-safe;
    /// callable from any scheduler agent. Never fails; the eventual result
    /// is posted to `inbox`.
    pub fn schedule(&self, channel: String, run_at: i64, inbox: oneshot::Sender<DownloadResult>) {
        let upcoming = run_at - now();
        if upcoming < 1 {
            info!(channel = %channel, "will refresh ASAP");
        } else {
            debug!(channel = %channel, seconds = upcoming, "will refresh in {upcoming} seconds");
        }
        self.queue.push(run_at, channel, inbox);
    }

    /// Drive the dispatch loop forever. Must be called from exactly one
    /// task; worker spawning is not itself gated by the concurrency limit
    /// — every drained job immediately produces a worker task, which then
    /// blocks on the gate before touching the network. This preserves FIFO
    /// dispatch order under load while honoring the global ceiling inside
    /// workers.
    pub async fn run(self: Arc<Self>, beautify: bool) -> ! {
        self.beautify.store(beautify, Ordering::Relaxed);
        info!(limit = self.gate.limit(), "dispatcher started");

        loop {
            if self.queue.is_empty() {
                debug!("waiting for work");
                self.queue.wait_non_empty().await;
            }

            // Drain due jobs.
            while let Some(run_at) = self.queue.peek_run_at() {
                if run_at > now() {
                    break;
                }
                let behind = now() - run_at;
                if behind > LATE_THRESHOLD_SECS {
                    warn!(seconds = behind, "scheduled download starting late");
                }
                let Some(job) = self.queue.pop() else { break };
                info!(channel = %job.channel, "starting download");
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    worker::run(
                        job.channel,
                        job.inbox,
                        dispatcher.gate.clone(),
                        dispatcher.client.clone(),
                        dispatcher.upstream_url.clone(),
                        dispatcher.local_root.clone(),
                    )
                    .await;
                });
            }

            // Defer future jobs, announcing the wait periodically.
            while let Some(run_at) = self.queue.peek_run_at() {
                if run_at <= now() {
                    break;
                }
                let to_wait = run_at - now();
                if to_wait > ANNOUNCE_THRESHOLD_SECS && to_wait % ANNOUNCE_INTERVAL_SECS == 0 {
                    info!(seconds = to_wait, "next job starts in {to_wait} seconds");
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

pub(crate) fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}
