//! Binary entry point: wires configuration, dispatcher, and supervisor
//! into a running mirror agent.
//!
//! Grounded in `original_source/cli.py::main`.

use std::sync::Arc;

use clap::Parser;
use tracing::error;

use chandata_mirror::cli::{init_logging, Args};
use chandata_mirror::config::ConfigProvider;
use chandata_mirror::dispatch::Dispatcher;
use chandata_mirror::supervisor::Supervisor;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();
    init_logging(args.level, args.colorize);

    let config = match ConfigProvider::load(
        args.config.clone(),
        args.upstream_url.clone(),
        args.local_path.clone(),
    ) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "failed to load channel configuration");
            return std::process::ExitCode::FAILURE;
        }
    };

    let dispatcher = Dispatcher::new(
        args.concurrent_downloads as usize,
        config.upstream_url().to_string(),
        config.local_root().to_path_buf(),
    );

    Supervisor::new(config, dispatcher).run(args.beautify).await;

    // `Supervisor::run` only returns if the dispatcher task died.
    std::process::ExitCode::FAILURE
}
