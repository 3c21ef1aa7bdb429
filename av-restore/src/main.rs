mod cli;
mod commands;
mod progress;

use std::io::IsTerminal;
use std::process::ExitCode;

use anyhow::{Context, Result};
use av_restore::config::AppConfig;
use av_restore::logging;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::cli::Args;
use crate::commands::CommandExecutor;

/// Conventional exit status for a run stopped by SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let directive = args
        .log_filter
        .clone()
        .unwrap_or_else(|| logging::verbosity_filter(args.verbose, args.quiet));
    // Held until `main` returns so buffered file logs are flushed.
    let _guard = match logging::init(&directive, args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if is_interrupted(&e) {
                warn!("Interrupted; finished segments were kept");
                eprintln!("Interrupted");
                return ExitCode::from(EXIT_INTERRUPTED);
            }
            error!("Application error: {:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Whether `e` only reports a cancellation somewhere in its cause chain.
fn is_interrupted(e: &anyhow::Error) -> bool {
    e.chain()
        .filter_map(|cause| cause.downcast_ref::<av_restore::Error>())
        .any(av_restore::Error::is_cancelled)
}

async fn run(args: Args) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    config.apply_env();
    if let Some(root) = args.work_root {
        config.work_root = root;
    }
    config.validate()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping external tools");
            on_signal.cancel();
        }
    });

    let show_progress = !args.quiet && std::io::stderr().is_terminal();
    let executor = CommandExecutor::new(config, cancel, show_progress);
    executor.execute(args.command).await
}
