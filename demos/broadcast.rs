//! Broadcast chat against a live server.
//!
//! Opens `grafana/broadcast/<room>`, prints every message and publishes each
//! line read from stdin.
//!
//! Usage: cargo run --example broadcast -- [app-url] [room] [--debug]

// ============================================================================
// Imports
// ============================================================================

use futures_util::StreamExt;
use live_channels::{ChannelAddress, ChannelState, Multiplexer, SessionId, WsProvider};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let debug = args.iter().any(|a| a == "--debug");
    let mut positional = args.iter().filter(|a| !a.starts_with("--"));
    let app_url = positional
        .next()
        .cloned()
        .unwrap_or_else(|| "http://localhost:3000/".to_string());
    let room = positional.next().cloned().unwrap_or_else(|| "demo".to_string());

    let filter = if debug {
        "live_channels=debug"
    } else {
        "live_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let mux = Multiplexer::builder()
        .session(SessionId::generate("demo"))
        .app_url(&app_url)
        .start_with(WsProvider::default())?;
    println!("Endpoint: {}", mux.url());

    let channel = mux.channel(ChannelAddress::new("grafana", "broadcast", &room));

    let mut statuses = Box::pin(channel.status_stream());
    tokio::spawn(async move {
        while let Some(status) = statuses.next().await {
            match &status.error {
                Some(error) => println!("[status] {} ({error})", status.state),
                None => println!("[status] {}", status.state),
            }
            if status.state.is_terminal() {
                break;
            }
        }
    });

    let mut messages = channel.messages();
    tokio::spawn(async move {
        while let Some(message) = messages.next().await {
            println!("[message] {message}");
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if channel.state() != ChannelState::Connected {
            println!("Not connected yet ({})", channel.state());
            continue;
        }
        if let Err(e) = channel.publish(json!({ "text": line })) {
            println!("Publish failed: {e}");
        }
    }

    mux.shutdown().await;
    Ok(())
}
