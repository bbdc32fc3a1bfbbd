use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiostream::cli::{log_filter, ServerOpts};
use audiostream::logger::{Logger, NoopLogger, TextLogger};
use audiostream::server::{self, AdminCommand};

fn main() -> Result<()> {
    let opts = ServerOpts::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_filter(opts.verbose)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = opts.resolve().context("invalid server configuration")?;

    let logger: Arc<dyn Logger> = match &opts.log_file {
        Some(path) => match TextLogger::new(path) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "event log disabled");
                Arc::new(NoopLogger)
            }
        },
        None => Arc::new(NoopLogger),
    };

    println!("Starting audiostream server:");
    println!("  Library: {}", config.library.display());
    println!("  Listen:  {}", config.listen_addr());
    println!("Type 'q' to shut down or 'r' to rescan the library");

    let (admin_tx, admin_rx) = mpsc::channel(8);

    let interrupt = admin_tx.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, shutting down...");
        let _ = interrupt.try_send(AdminCommand::Shutdown);
    })
    .context("failed to install Ctrl-C handler")?;

    // Blocking stdin reader; it exits with the process.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "q" | "quit" => AdminCommand::Shutdown,
                "r" | "rescan" => AdminCommand::Rescan,
                "" => continue,
                other => {
                    eprintln!("Unknown command '{other}' (q = quit, r = rescan)");
                    continue;
                }
            };
            if admin_tx.blocking_send(command).is_err() {
                break;
            }
        }
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let stats = rt.block_on(server::serve(config, logger, admin_rx))?;
    rt.shutdown_timeout(Duration::from_secs(1));

    println!(
        "Server stopped: {} connections, {} rescans ({} failed), {} abnormal workers",
        stats.accepted, stats.rescans, stats.failed_rescans, stats.failed_workers
    );
    Ok(())
}
