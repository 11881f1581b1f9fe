//! Arca RPC: newline-delimited JSON-RPC dispatch server
//!
//! Serves JSON-RPC over persistent TCP connections. Requests are routed by
//! (context, method) to registered handlers; server notifications are
//! broadcast to every connected client.
//!
//! Usage:
//!   arca-rpc                          # 127.0.0.1:7070
//!   arca-rpc --port 9000              # Custom port
//!   arca-rpc --max-connections 64     # Cap concurrent clients
//!   arca-rpc --log-file               # Log to ~/.arca/logs/arca-rpc.log

use std::path::PathBuf;

use anyhow::Context as _;
use arca_server::RpcServer;
use arca_transport::ServerConfig;
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arca-rpc", about = "Arca JSON-RPC dispatch server")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7070")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Longest accepted request line in bytes
    #[arg(long, default_value = "1048576")]
    max_frame_bytes: usize,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Write logs to a file (defaults to ~/.arca/logs/arca-rpc.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            address: format!("{}:{}", self.hostname, self.port),
            max_frame_bytes: self.max_frame_bytes,
            max_connections: self.max_connections,
        }
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let Some(ref log_file_arg) = cli.log_file else {
        if cli.json_logs {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        return Ok(());
    };

    let log_path = if log_file_arg == "DEFAULT" {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(&home).join(".arca/logs/arca-rpc.log")
    } else {
        PathBuf::from(log_file_arg)
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let mut server: RpcServer = RpcServer::new(cli.server_config());

    // Liveness probe for clients
    server.register_source("Ping", "Global", |_request| Ok(Some(json!("Pong"))));

    let addr = server.start().await.context("failed to start server")?;

    println!();
    println!("  Arca RPC listening on {addr}");
    if let Some(max) = server.config().max_connections {
        println!("  Max connections: {max}");
    }
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    server.close().await;
    Ok(())
}
