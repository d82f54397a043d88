//! # chandata-mirror
//!
//! A long-running mirror agent that polls channel metadata documents from
//! an upstream HTTP origin on an adaptive per-channel cadence, downloads
//! them through a globally concurrency-bounded worker pool, and on change
//! atomically installs the new document and regenerates a recent-packages
//! feed.
//!
//! ## Design Philosophy
//!
//! - **Adaptive, not fixed-interval** — each channel's scheduler agent
//!   adjusts its next request using the observed duration of past
//!   downloads, so a slow channel doesn't starve a fast one.
//! - **One shared concurrency ceiling** — however many channels are
//!   configured, no more than `--concurrent-downloads` fetches run at once.
//! - **Byte-exact change detection** — a channel document is only
//!   decompressed and installed when its compressed bytes actually differ
//!   from the last cached copy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chandata_mirror::config::ConfigProvider;
//! use chandata_mirror::dispatch::Dispatcher;
//! use chandata_mirror::supervisor::Supervisor;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ConfigProvider::load(
//!         "channels.json",
//!         "https://conda-static.anaconda.org",
//!         "/var/mirror",
//!     )?);
//!     let dispatcher = Dispatcher::new(32, config.upstream_url().to_string(), config.local_root().to_path_buf());
//!     let supervisor = Supervisor::new(config, dispatcher);
//!     supervisor.run(true).await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Command-line argument parsing and logging setup.
pub mod cli;
/// Channel configuration provider.
pub mod config;
/// Dispatch queue and concurrency-gated job admission.
pub mod dispatch;
/// Error types.
pub mod error;
/// Recent-package feed rendering.
pub mod feed;
/// Per-channel scheduler agent.
pub mod scheduler;
/// Scheduler creation/observation and dispatcher liveness monitoring.
pub mod supervisor;
/// Core shared types.
pub mod types;
/// Download worker state machine.
pub mod worker;

pub use config::ConfigProvider;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use scheduler::Scheduler;
pub use supervisor::Supervisor;
