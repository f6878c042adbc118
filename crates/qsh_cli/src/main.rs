mod args;
mod cache;
mod cancel;
mod client;
mod complete;
mod config;
mod csv;
mod error;
mod executor;
mod format;
mod meta;
mod pager;
mod repl;
mod stream;
mod timing;

use anyhow::{Context, Result};
use args::Args;
use clap::Parser;
use client::PgEngine;
use config::{load_config, Settings};
use repl::{interrupted, run_repl, terminal_is_interactive, Session, StdConsole};
use std::process;
use std::sync::Arc;
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("qsh: error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("Could not load config")?;
    let settings = Settings::resolve(&args, config);

    let engine = PgEngine::connect(settings.connect.clone())
        .await
        .with_context(|| {
            format!(
                "Could not connect to {}:{}",
                settings.connect.host, settings.connect.port
            )
        })?;

    if let Some(cmd) = args.command.as_deref() {
        debug!("Mode: -c");
        let console = StdConsole::new(settings.output, false);
        let mut session = Session::new(Arc::new(engine), settings.stream, console);
        session.dispatch(cmd, interrupted()).await?;
    } else {
        debug!("Mode: REPL");
        let console = StdConsole::new(settings.output, terminal_is_interactive());
        let mut session = Session::new(Arc::new(engine), settings.stream, console);
        run_repl(&mut session, settings.history_file.as_deref()).await?;
    }

    Ok(())
}
