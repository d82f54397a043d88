//! Supervisor: creates scheduler agents on demand and watches the
//! dispatcher task's liveness.
//!
//! Grounded in `original_source/cli.py::main`'s five-second tick loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ConfigProvider;
use crate::dispatch::Dispatcher;
use crate::scheduler::Scheduler;

/// How often the supervisor checks dispatcher liveness and reconciles
/// scheduler agents against the configured channel set (spec.md §4.4).
const TICK: std::time::Duration = std::time::Duration::from_secs(5);

/// Owns the set of per-channel scheduler agents, keyed by channel name,
/// and the dispatcher's task handle.
pub struct Supervisor {
    config: Arc<ConfigProvider>,
    dispatcher: Arc<Dispatcher>,
}

impl Supervisor {
    /// Build a supervisor over an already-constructed config provider and
    /// dispatcher. Does not start the dispatcher's run loop; callers spawn
    /// that themselves so this type only owns the reconciliation tick.
    pub fn new(config: Arc<ConfigProvider>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Spawn the dispatcher's run loop and drive the reconciliation tick
    /// forever. Returns (and logs at error level) only if the dispatcher
    /// task exits, matching `cli.py::main`'s "Downloader thread has died -
    /// exiting" behavior.
    pub async fn run(self, beautify: bool) {
        let dispatcher_handle: JoinHandle<()> = tokio::spawn({
            let dispatcher = self.dispatcher.clone();
            async move {
                dispatcher.run(beautify).await;
            }
        });

        let mut schedulers: HashMap<String, (Arc<Scheduler>, JoinHandle<()>)> = HashMap::new();
        let mut ticker = tokio::time::interval(TICK);

        loop {
            ticker.tick().await;

            if dispatcher_handle.is_finished() {
                error!("dispatcher task has died - exiting");
                return;
            }

            let channels = self.config.channels();
            for channel in channels.keys() {
                schedulers
                    .entry(channel.clone())
                    .or_insert_with(|| {
                        let agent = Scheduler::new(channel.clone());
                        let handle = tokio::spawn({
                            let agent = agent.clone();
                            let config = self.config.clone();
                            let dispatcher = self.dispatcher.clone();
                            async move {
                                agent.run(config, dispatcher).await;
                            }
                        });
                        (agent, handle)
                    });
            }

            for (channel, (agent, handle)) in schedulers.iter() {
                if channels.contains_key(channel) {
                    agent.observed();
                }
                if handle.is_finished() {
                    info!(channel = %channel, "scheduler task exited, will recreate on next tick");
                }
            }
            schedulers.retain(|_, (_, handle)| !handle.is_finished());
        }
    }
}
