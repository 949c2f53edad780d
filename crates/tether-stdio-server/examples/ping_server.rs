//! # Ping Server
//!
//! Minimal JSON-RPC server over stdin/stdout.
//!
//! ```text
//! $ echo '{"jsonrpc":"2.0","id":1,"method":"ping"}' | cargo run --example ping_server
//! {"jsonrpc":"2.0","id":1,"result":{"ok":true}}
//! ```
//!
//! Logs go to stderr so stdout carries protocol frames only. Set `RUST_LOG`
//! to adjust verbosity.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Value, json};
use tether_stdio_server::{
    DetectOptions, HandlerError, StdioServer, detect, notification_fn, request_fn,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ping-server", about = "JSON-RPC ping server over stdio")]
struct Args {
    /// Framing: content-length, newline or auto (falls back to TETHER_FRAMING)
    #[arg(short, long)]
    framing: Option<String>,

    /// Maximum handlers running at once
    #[arg(short = 'c', long, default_value_t = 16)]
    max_concurrent: usize,

    /// Per-request timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut options = DetectOptions::new();
    if let Some(framing) = args.framing {
        options = options.framing(framing);
    }
    let resolved = detect(&options).context("failed to resolve transport")?;

    let mut builder = StdioServer::from_detected(&resolved)?
        .max_concurrent_requests(args.max_concurrent)
        .method(
            "ping",
            request_fn(|_req, _ctx| async { Ok::<_, HandlerError>(json!({"ok": true})) }),
        )
        .method(
            "echo",
            request_fn(|req, _ctx| async move {
                Ok::<_, HandlerError>(req.params.map(|p| p.to_value()).unwrap_or(Value::Null))
            }),
        )
        .notification(
            "notifications/initialized",
            notification_fn(|_n| async {
                info!("client initialized");
                Ok::<_, HandlerError>(())
            }),
        );
    if let Some(ms) = args.timeout_ms {
        builder = builder.request_timeout(Duration::from_millis(ms));
    }

    let stats = builder.build().run().await?;
    info!(
        requests = stats.requests,
        notifications = stats.notifications,
        invalid = stats.invalid,
        "stdin closed"
    );
    Ok(())
}
