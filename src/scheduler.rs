//! Per-channel scheduler agent: adaptive timing, bounded history, and the
//! submit/await/feed-trigger cycle.
//!
//! Grounded in `original_source/scheduler.py::Scheduler`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::ConfigProvider;
use crate::dispatch::{now, Dispatcher};
use crate::feed;
use crate::types::DownloadResult;

/// Random jitter ceiling applied to the computed start time, in seconds
/// (spec.md §4.3 step 4).
const ALLOWED_SCHEDULE_DRIFT: f64 = 5.0;
/// History is trimmed to this many entries, newest first (spec.md §3
/// `SchedulerHistory`).
const MAX_HISTORY: usize = 100;
/// `is_observed()` goes false after this many seconds without a call to
/// `observed()` (spec.md §4.3).
const OBSERVATION_TIMEOUT_SECS: i64 = 60;

/// One channel's adaptive-timing agent. Owns its own history; the queue
/// is read and written only from `run`'s task, so no internal locking is
/// needed for it.
pub struct Scheduler {
    channel: String,
    last_observed: AtomicI64,
}

impl Scheduler {
    /// Create an agent for `channel`. Does not start its loop; callers
    /// spawn [`Scheduler::run`] separately so the supervisor can hold a
    /// handle to the agent for `observed()` calls.
    pub fn new(channel: impl Into<String>) -> Arc<Self> {
        let channel = channel.into();
        info!(channel = %channel, "scheduler created");
        Arc::new(Self {
            channel,
            last_observed: AtomicI64::new(now()),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Marks this agent as observed. Must be called only from the
    /// supervisor's tick loop (spec.md §4.3).
    pub fn observed(&self) {
        let observed_at = self.observation_time_now();
        self.last_observed.store(observed_at, Ordering::SeqCst);
    }

    /// True iff `observed()` was called within the last 60 seconds.
    pub fn is_observed(&self) -> bool {
        let now = self.observation_time_now();
        let last = self.last_observed.load(Ordering::SeqCst);
        now - last < OBSERVATION_TIMEOUT_SECS
    }

    fn observation_time_now(&self) -> i64 {
        let n = now();
        let last = self.last_observed.load(Ordering::SeqCst);
        if n < last {
            error!(channel = %self.channel, "detected clock jump - pretending it didn't happen");
        }
        n
    }

    /// Drive the scheduling loop until the agent goes unobserved
    /// (spec.md §4.3/§4.4 P7). Intended to run as its own task.
    pub async fn run(self: Arc<Self>, config: Arc<ConfigProvider>, dispatcher: Arc<Dispatcher>) {
        let mut history: VecDeque<DownloadResult> = VecDeque::with_capacity(MAX_HISTORY);
        let mut attempt: u64 = 0;

        while self.is_observed() {
            let cadence = config.cadence(&self.channel).unwrap_or(0);
            if cadence <= 0 {
                debug!(channel = %self.channel, cadence, "disabled, checking again soon");
                fuzz(20.0).await;
                continue;
            }

            let since_last = match last_success(&history) {
                None => {
                    fuzz(10.0).await;
                    cadence
                }
                Some(result) => {
                    let completed = result.completed.unwrap_or_else(now);
                    let delta = now() - completed;
                    if delta < 0 {
                        warn!(channel = %self.channel, since_last = delta, "possible clock jump - ignoring");
                        cadence
                    } else {
                        delta
                    }
                }
            };

            let typical_duration = median_duration(&history);
            if typical_duration > cadence {
                error!(channel = %self.channel, typical_duration, cadence, "typical duration greater than cadence");
            }

            let drift = rand::thread_rng().gen_range(0.0..ALLOWED_SCHEDULE_DRIFT);
            let should_start_in = cadence as f64 - since_last as f64 - typical_duration as f64 - drift;

            if should_start_in < -(cadence as f64) {
                error!(channel = %self.channel, should_start_in, cadence, "schedule is far behind cadence");
            }

            if should_start_in >= 10.0 {
                fuzz(2.0).await;
                continue;
            }

            if typical_duration > 20 {
                warn!(channel = %self.channel, median_seconds = typical_duration, "JUMBO: slow typical download");
            }

            attempt += 1;
            let download_id = format!("download({attempt})");
            let run_at = now() + should_start_in.max(0.0).round() as i64;
            let (tx, rx) = oneshot::channel();
            dispatcher.schedule(self.channel.clone(), run_at, tx);
            info!(channel = %self.channel, %download_id, "scheduled - waiting for result");

            match tokio::time::timeout(Duration::from_secs((cadence * 5).max(1) as u64), rx).await {
                Err(_) | Ok(Err(_)) => {
                    error!(channel = %self.channel, %download_id, "download did not complete");
                }
                Ok(Ok(mut result)) => {
                    result.channel = Some(self.channel.clone());
                    result.download_id = Some(download_id.clone());
                    info!(channel = %self.channel, %download_id, "result available");

                    if result.updated.is_some() {
                        info!(channel = %self.channel, %download_id, "updated");
                        self.spawn_feed_render(&config, dispatcher.beautify(), result.clone());
                    }

                    history.push_front(result);
                    if history.len() > MAX_HISTORY {
                        debug!(channel = %self.channel, "popping history");
                        history.pop_back();
                    }
                }
            }
        }

        info!(channel = %self.channel, "scheduler exiting: no longer observed");
    }

    fn spawn_feed_render(&self, config: &Arc<ConfigProvider>, beautify: bool, result: DownloadResult) {
        let channel = self.channel.clone();
        let threshold = config.freshness_threshold_days(&channel);
        tokio::spawn(async move {
            let Some(filename) = result.filename.clone() else {
                return;
            };
            if let Err(e) = feed::render(&channel, &filename, threshold, beautify).await {
                warn!(channel = %channel, error = %e, "failed to render feed");
            }
        });
    }
}

async fn fuzz(ceiling_secs: f64) {
    let secs = rand::thread_rng().gen_range(0.0..ceiling_secs);
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

fn successful(history: &VecDeque<DownloadResult>) -> impl Iterator<Item = &DownloadResult> {
    history.iter().filter(|r| r.is_success())
}

fn last_success(history: &VecDeque<DownloadResult>) -> Option<&DownloadResult> {
    successful(history).next()
}

fn median_duration(history: &VecDeque<DownloadResult>) -> i64 {
    let mut durations: Vec<i64> = successful(history)
        .filter_map(|r| match (r.completed, r.scheduled_start) {
            (Some(c), Some(s)) => Some(c - s),
            _ => None,
        })
        .collect();
    if durations.is_empty() {
        return 0;
    }
    durations.sort_unstable();
    durations[durations.len() / 2]
}
