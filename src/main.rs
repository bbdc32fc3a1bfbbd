//! audiostream - interactive client for an audiostreamd library

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiostream::cli::{log_filter, ClientOpts};
use audiostream::client::{ClientSession, TransferOutcome};
use audiostream::config::ClientConfig;
use audiostream::shell::{self, ShellCommand};

#[tokio::main]
async fn main() -> Result<()> {
    let opts = ClientOpts::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_filter(opts.verbose)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = opts.resolve().context("invalid client configuration")?;
    println!(
        "Connecting to server at {}:{}, using library in {}",
        config.address,
        config.port,
        config.library.display()
    );

    let mut session = Some(
        ClientSession::connect(config.clone())
            .await
            .context("failed to connect to server")?,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Enter a command: ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("failed to read command")? else {
            break;
        };
        let command = match shell::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match command {
            ShellCommand::Empty => continue,
            ShellCommand::Help => {
                println!("{}", shell::help_text());
                continue;
            }
            ShellCommand::Quit => break,
            _ => {}
        }

        // A connection dropped by an earlier failure is replaced on demand;
        // the catalog it held is gone with it.
        if session.is_none() {
            match ClientSession::connect(config.clone()).await {
                Ok(fresh) => session = Some(fresh),
                Err(e) => {
                    println!("Could not reconnect: {e}");
                    continue;
                }
            }
        }
        let Some(current) = session.as_mut() else {
            continue;
        };

        if let Err(e) = execute(current, command, &config).await {
            println!("Error: {e}");
            if !current.is_usable() {
                tracing::warn!("dropping connection after failed request");
                session = None;
            }
        }
    }

    println!("Goodbye");
    Ok(())
}

async fn execute(
    session: &mut ClientSession<TcpStream>,
    command: ShellCommand,
    config: &ClientConfig,
) -> audiostream::Result<()> {
    match command {
        ShellCommand::List => {
            let library = session.list().await?;
            if library.is_empty() {
                println!("Server library is empty");
            }
            for (i, name) in library.iter().enumerate() {
                println!("{i}: {name}");
            }
        }
        ShellCommand::Get(index)
        | ShellCommand::Stream(index)
        | ShellCommand::StreamAndGet(index) => {
            if session.library().is_empty() {
                println!("Server library is empty or not retrieved yet");
                return Ok(());
            }
            let outcome = match command {
                ShellCommand::Get(_) => session.get(index).await?,
                ShellCommand::Stream(_) => session.stream(index).await?,
                _ => session.stream_and_get(index).await?,
            };
            for line in summary(&outcome, &config.player.program) {
                println!("{line}");
            }
        }
        ShellCommand::Help | ShellCommand::Quit | ShellCommand::Empty => {}
    }
    Ok(())
}

fn summary(outcome: &TransferOutcome, player: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(path) = &outcome.saved_to {
        if outcome.saved_completely() {
            lines.push(format!(
                "Saved {} ({} bytes) to {}",
                outcome.name,
                outcome.size,
                path.display()
            ));
        } else {
            lines.push(format!("Could not save {} to {}", outcome.name, path.display()));
        }
    }
    if let Some(exit) = outcome.playback {
        lines.push(format!("Audio player `{player}` {exit}"));
    }
    lines
}
