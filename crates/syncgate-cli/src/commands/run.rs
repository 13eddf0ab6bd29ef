//! JSON-lines gateway runner
//!
//! Each stdin line is either a request descriptor
//! (`{"method": "POST", "url": "/api/notes", "body": {...}}`) or a
//! connectivity change (`{"online": false}`). One JSON reply is written to
//! stdout per line; lifecycle events are interleaved as they happen.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use serde_json::{json, Value};
use syncgate::{RequestGateway, RetryScheduler};
use syncgate_core::{Body, GatewayConfig, GatewayRequest, Headers, Method, Priority};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Args)]
pub struct RunCommand {
    /// Start with the host marked offline
    #[arg(long)]
    pub offline: bool,

    /// Do not write lifecycle events to stdout
    #[arg(long)]
    pub no_events: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RunInput {
    Connectivity { online: bool },
    Request(RequestLine),
}

/// Request descriptor with a plain JSON body
#[derive(Debug, Deserialize)]
struct RequestLine {
    method: Method,
    url: String,
    #[serde(default)]
    headers: Headers,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    query: bool,
    #[serde(default)]
    priority: Priority,
}

impl RequestLine {
    fn into_request(self) -> GatewayRequest {
        let mut request = GatewayRequest::new(self.method, self.url);
        request.headers = self.headers;
        request.query_operation = self.query;
        request
            .with_body(self.body.map_or(Body::Empty, Body::Json))
            .with_priority(self.priority)
    }
}

fn parse_input(line: &str) -> Result<RunInput, serde_json::Error> {
    serde_json::from_str(line)
}

pub async fn handle_run_command(cmd: RunCommand, config: GatewayConfig) -> Result<()> {
    let gateway = super::common::open_gateway(config, !cmd.offline).await?;
    let scheduler = Arc::new(RetryScheduler::new(gateway.clone())).spawn();
    let printer = (!cmd.no_events).then(|| spawn_event_printer(gateway.events().subscribe()));
    info!(online = !cmd.offline, "Reading requests from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = handle_line(&gateway, line).await;
        println!("{reply}");
    }

    scheduler.shutdown().await;
    if let Some(printer) = printer {
        printer.abort();
    }
    Ok(())
}

async fn handle_line(gateway: &RequestGateway, line: &str) -> Value {
    match parse_input(line) {
        Ok(RunInput::Connectivity { online }) => {
            gateway.connectivity().set_online(online);
            json!({ "online": online })
        }
        Ok(RunInput::Request(line)) => {
            let request = line.into_request();
            debug!(method = %request.method, url = %request.url, "Request");
            match gateway.execute(request).await {
                Ok(outcome) => serde_json::to_value(&outcome).unwrap_or_else(|e| {
                    json!({ "outcome": "error", "error": format!("unserializable outcome: {e}") })
                }),
                Err(err) => json!({
                    "outcome": "error",
                    "error": err.to_string(),
                    "retry_after_seconds": err.retry_after_seconds(),
                }),
            }
        }
        Err(err) => {
            warn!(error = %err, "Unreadable input line");
            json!({ "outcome": "error", "error": format!("invalid input: {err}") })
        }
    }
}

fn spawn_event_printer(mut events: broadcast::Receiver<syncgate::GatewayEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "Failed to encode event"),
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
