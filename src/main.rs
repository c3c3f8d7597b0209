use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use soulbridge_cli::{discovery, fetch_build_status, BridgeEvent, BridgeSettings, SoulBridge};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "soulbridge",
    version,
    about = "Debug bridge for running React Native apps"
)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan well-known ports and list debuggable runtime targets
    Status,
    /// Connect to a runtime and stream console output until interrupted
    Connect {
        #[arg(long, default_value_t = 8081)]
        port: u16,
    },
    /// Evaluate a JavaScript expression on the connected runtime
    Eval {
        #[arg(long, default_value_t = 8081)]
        port: u16,
        /// Await promise results before formatting
        #[arg(long)]
        await_result: bool,
        expression: String,
    },
    /// Capture logs for a short window, then print the newest entries
    Logs {
        #[arg(long, default_value_t = 8081)]
        port: u16,
        #[arg(short = 'n', long, default_value_t = 50)]
        count: usize,
        /// Listening window in seconds
        #[arg(long, default_value_t = 3)]
        window: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Status => cmd_status().await,
        Commands::Connect { port } => cmd_connect(port).await,
        Commands::Eval {
            port,
            await_result,
            expression,
        } => cmd_eval(port, &expression, await_result).await,
        Commands::Logs {
            port,
            count,
            window,
        } => cmd_logs(port, count, window).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let settings = BridgeSettings::default();
    let probe_timeout = Duration::from_millis(settings.adapter.probe_timeout_ms);
    let targets = discovery::scan(&settings.adapter.candidate_ports, probe_timeout).await;

    if targets.is_empty() {
        println!("no debuggable runtimes found");
        return Ok(());
    }

    let mut live_ports = BTreeSet::new();
    for target in &targets {
        live_ports.insert(target.port);
        println!("port {:>5}  {}  {}", target.port, target.title, target.ws_url);
    }
    for port in live_ports {
        match fetch_build_status(port).await {
            Ok(true) => println!("port {:>5}  bundler idle", port),
            Ok(false) => println!("port {:>5}  build in progress", port),
            Err(_) => {}
        }
    }
    Ok(())
}

async fn cmd_connect(port: u16) -> Result<()> {
    let bridge = SoulBridge::default();
    let info = bridge.connect(port).await.context("connect failed")?;
    info!(key = %info.key, title = %info.target.title, "connected");

    if let Err(err) = bridge.open_build_channel(port).await {
        info!(%err, "build channel unavailable");
    }

    let mut events = bridge.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(BridgeEvent::ConsoleMessage { level, message, .. }) => {
                    println!("[{}] {}", level, message);
                }
                Ok(BridgeEvent::SessionClosed { reason, .. }) => {
                    error!(reason = %reason, "session closed");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    bridge.shutdown().await;
    Ok(())
}

async fn cmd_eval(port: u16, expression: &str, await_result: bool) -> Result<()> {
    let bridge = SoulBridge::default();
    bridge.connect(port).await.context("connect failed")?;

    match bridge.evaluate(expression, await_result).await {
        Ok(value) => println!("{}", value),
        Err(err) => println!("evaluation failed: {}", err),
    }

    bridge.shutdown().await;
    Ok(())
}

async fn cmd_logs(port: u16, count: usize, window: u64) -> Result<()> {
    let bridge = SoulBridge::default();
    bridge.connect(port).await.context("connect failed")?;

    tokio::time::sleep(Duration::from_secs(window)).await;
    for record in bridge.logs().recent(count) {
        println!("[{}] {}", record.level, record.message);
    }

    bridge.shutdown().await;
    Ok(())
}
