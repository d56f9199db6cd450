//! mcp-ws: standalone multi-client WebSocket server for MCP JSON-RPC
//!
//! Runs the transport with a small built-in dispatcher (`ping`,
//! `server/info`). Embedders use the `mcp-ws-transport` crate directly and
//! plug in their own `MessageHandler`.
//!
//! Usage:
//!   mcp-ws                                      # ws://127.0.0.1:7080/mcp
//!   mcp-ws --port 9000 --path /rpc              # Custom endpoint
//!   mcp-ws --api-key s3cret                     # Require an API key
//!   mcp-ws --generate-api-key                   # Require a fresh random key
//!   mcp-ws --security-config security.json      # Full security policy

mod dispatcher;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use mcp_ws_transport::{SecurityConfig, Transport, TransportConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::dispatcher::BasicDispatcher;

#[derive(Parser, Debug)]
#[command(name = "mcp-ws", about = "Multi-client WebSocket transport for MCP servers")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7080")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// WebSocket endpoint path
    #[arg(long, default_value = "/mcp")]
    path: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "100")]
    max_connections: usize,

    /// Seconds between heartbeat pings
    #[arg(long, default_value = "30")]
    heartbeat_secs: u64,

    /// Close clients idle for this many seconds
    #[arg(long, default_value = "60")]
    client_timeout_secs: u64,

    /// Forget unanswered requests after this many seconds
    #[arg(long, default_value = "60")]
    request_ttl_secs: u64,

    /// JSON security policy (auth, rate limits, validation, CORS)
    #[arg(long)]
    security_config: Option<PathBuf>,

    /// Accept this API key (repeatable; enables authentication)
    #[arg(long = "api-key")]
    api_keys: Vec<String>,

    /// Generate a random API key, print it, and require it
    #[arg(long)]
    generate_api_key: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.mcp-ws/logs/mcp-ws.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

fn init_tracing(verbose: bool, log_file: Option<&str>) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(log_file_arg) = log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    };

    let log_path = if log_file_arg == "DEFAULT" {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".mcp-ws/logs/mcp-ws.log")
    } else {
        PathBuf::from(log_file_arg)
    };
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

fn load_security_config(path: Option<&Path>) -> anyhow::Result<SecurityConfig> {
    let Some(path) = path else {
        return Ok(SecurityConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid security config {}", path.display()))
}

/// Random 32-byte key, hex-encoded.
fn generate_api_key() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;

    let mut security = load_security_config(cli.security_config.as_deref())?;
    let mut api_keys = cli.api_keys;
    let generated = cli.generate_api_key.then(generate_api_key);
    api_keys.extend(generated.clone());
    if !api_keys.is_empty() {
        security.auth.enabled = true;
        security.auth.api_keys.extend(api_keys);
    }

    let config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname,
        path: cli.path,
        max_connections: cli.max_connections,
        heartbeat_interval: Duration::from_secs(cli.heartbeat_secs.max(1)),
        client_timeout: Duration::from_secs(cli.client_timeout_secs),
        request_ttl: Duration::from_secs(cli.request_ttl_secs),
        ..TransportConfig::default()
    };

    let auth_enabled = security.auth.enabled;
    let mut transport = Transport::start(config, security, BasicDispatcher::new())
        .await
        .context("failed to start transport")?;

    println!();
    println!("  mcp-ws v{}", env!("CARGO_PKG_VERSION"));
    println!("────────────────────────────────────────────────────────────────");
    println!("  Endpoint:  {}", transport.url());
    println!("  Health:    http://{}/health", transport.local_addr());
    println!("  Auth:      {}", if auth_enabled { "API key required" } else { "disabled" });
    if let Some(key) = &generated {
        println!("  API key:   {key}");
    }
    println!("────────────────────────────────────────────────────────────────");
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutdown requested");
    println!();
    println!("  Shutting down...");
    transport.close().await;
    println!("  Server stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_64_hex_chars_and_distinct() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn cli_collects_repeated_api_keys() {
        let cli = Cli::parse_from(["mcp-ws", "--api-key", "a", "--api-key", "b", "--port", "0"]);
        assert_eq!(cli.api_keys, vec!["a", "b"]);
        assert_eq!(cli.port, 0);
        assert_eq!(cli.path, "/mcp");
    }

    #[test]
    fn missing_security_config_path_means_defaults() {
        let cfg = load_security_config(None).unwrap();
        assert!(!cfg.auth.enabled);
    }
}
