//! Thread-safe time-ordered priority queue of scheduled jobs.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::{oneshot, Notify};

use crate::types::DownloadResult;

/// One pending download request: a channel, the epoch-second time it
/// should start, and the single-slot inbox the worker will post its
/// result into. Ordering is total on `run_at`, ties broken by insertion
/// order (spec.md §3 `ScheduledJob`).
pub struct ScheduledJob {
    pub(crate) run_at: i64,
    seq: u64,
    pub(crate) channel: String,
    pub(crate) inbox: oneshot::Sender<DownloadResult>,
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}
impl Eq for ScheduledJob {}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    // `BinaryHeap` is a max-heap; reverse the natural ordering on
    // (run_at, seq) so the heap's max element is the earliest-due job.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap over [`ScheduledJob`]s by `run_at`, with a blocking
/// "wait until non-empty" primitive and a non-blocking peek of the
/// earliest entry.
#[derive(Default)]
pub struct DispatchQueue {
    heap: Mutex<BinaryHeap<ScheduledJob>>,
    next_seq: AtomicU64,
    non_empty: Notify,
}

impl DispatchQueue {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job and wake any task blocked in [`Self::wait_non_empty`].
    pub fn push(&self, run_at: i64, channel: String, inbox: oneshot::Sender<DownloadResult>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let job = ScheduledJob {
            run_at,
            seq,
            channel,
            inbox,
        };
        self.heap.lock().expect("dispatch queue poisoned").push(job);
        self.non_empty.notify_one();
    }

    /// Remove and return the earliest-due job, if any.
    pub fn pop(&self) -> Option<ScheduledJob> {
        self.heap.lock().expect("dispatch queue poisoned").pop()
    }

    /// The `run_at` of the earliest-due job, without removing it.
    pub fn peek_run_at(&self) -> Option<i64> {
        self.heap
            .lock()
            .expect("dispatch queue poisoned")
            .peek()
            .map(|j| j.run_at)
    }

    /// True if the queue currently holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.heap.lock().expect("dispatch queue poisoned").is_empty()
    }

    /// Block until a job has been pushed since this call started, or
    /// return immediately if the queue is already non-empty.
    pub async fn wait_non_empty(&self) {
        if !self.is_empty() {
            return;
        }
        // Register interest before re-checking, so a push racing with
        // this call is never missed.
        let notified = self.non_empty.notified();
        if !self.is_empty() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(run_at: i64) -> (oneshot::Receiver<DownloadResult>, impl FnOnce(&DispatchQueue, String)) {
        let (tx, rx) = oneshot::channel();
        (rx, move |q: &DispatchQueue, channel: String| q.push(run_at, channel, tx))
    }

    #[test]
    fn pops_in_run_at_order() {
        let q = DispatchQueue::new();
        let (_rx_a, push_a) = job(20);
        let (_rx_b, push_b) = job(10);
        let (_rx_c, push_c) = job(30);
        push_a(&q, "a".into());
        push_b(&q, "b".into());
        push_c(&q, "c".into());

        assert_eq!(q.pop().unwrap().run_at, 10);
        assert_eq!(q.pop().unwrap().run_at, 20);
        assert_eq!(q.pop().unwrap().run_at, 30);
        assert!(q.pop().is_none());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let q = DispatchQueue::new();
        let (_rx_a, push_a) = job(5);
        let (_rx_b, push_b) = job(5);
        push_a(&q, "first".into());
        push_b(&q, "second".into());

        assert_eq!(q.pop().unwrap().channel, "first");
        assert_eq!(q.pop().unwrap().channel, "second");
    }

    #[tokio::test]
    async fn wait_non_empty_returns_immediately_when_populated() {
        let q = DispatchQueue::new();
        let (_rx, push) = job(1);
        push(&q, "x".into());
        tokio::time::timeout(std::time::Duration::from_millis(50), q.wait_non_empty())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn wait_non_empty_wakes_on_push() {
        use std::sync::Arc;
        let q = Arc::new(DispatchQueue::new());
        let q2 = q.clone();
        let handle = tokio::spawn(async move {
            q2.wait_non_empty().await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let (_rx, push) = job(1);
        push(&q, "x".into());

        tokio::time::timeout(std::time::Duration::from_millis(200), handle)
            .await
            .expect("waiter should wake up")
            .unwrap();
    }
}
