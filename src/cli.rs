//! Command-line argument parsing and logging setup.
//!
//! Grounded in `original_source/cli.py`'s click options and
//! `init_logging` function.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Mirrors channel metadata from an upstream origin on adaptive
/// per-channel cadence and republishes a recent-packages feed.
#[derive(Debug, Parser)]
#[command(name = "chandata-mirror", version, about)]
pub struct Args {
    /// Channel configuration json.
    #[arg(long)]
    pub config: PathBuf,

    /// Local directory for downloaded channel documents.
    #[arg(long = "local-path")]
    pub local_path: PathBuf,

    /// Base URL of the upstream origin.
    #[arg(long = "upstream-url", default_value = "https://conda-static.anaconda.org")]
    pub upstream_url: String,

    /// Colorize logging output.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub colorize: bool,

    /// Lowest logging level shown.
    #[arg(long, default_value = "info")]
    pub level: Level,

    /// The maximum allowed number of concurrent downloads.
    #[arg(long = "concurrent-downloads", default_value_t = 32, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub concurrent_downloads: u32,

    /// Pretty-print rendered rss.xml output.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub beautify: bool,
}

/// Lowest logging level shown, mirrors `init_logging`'s `--level` choice.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum Level {
    /// Verbose, per-attempt tracing.
    Debug,
    /// Normal operational messages.
    Info,
    /// Unexpected-but-recoverable conditions.
    Warning,
    /// Failures requiring attention.
    Error,
}

impl Level {
    fn as_filter_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warn",
            Level::Error => "error",
        }
    }
}

/// Initialize the global tracing subscriber. Colorized ANSI output by
/// default, matching `init_logging`'s level-name color codes.
pub fn init_logging(level: Level, colorize: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(colorize)
        .with_target(true)
        .init();
}
