//! SAP OData MCP Server
//!
//! Entry point for the server binary.
//! Serves MCP over stdio (JSON-RPC 2.0, one message per line) or the
//! REST wrapper over HTTP.

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sap_odata_mcp::config::Config;
use sap_odata_mcp::mcp::{JsonRpcRequest, JsonRpcResponse, SapMcpServer, PARSE_ERROR};
use sap_odata_mcp::rest;
use sap_odata_mcp::tools::SapTools;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sap-odata-mcp")]
#[command(author, version, about = "MCP Server for SAP OData services", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "SAP_MCP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP over stdio (default)
    Serve,
    /// Serve the REST wrapper over HTTP
    Rest {
        /// Address to bind
        #[arg(long, default_value = rest::DEFAULT_BIND)]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Log to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting SAP OData MCP Server...");

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    let runtime_config = config.to_runtime().context("invalid configuration")?;

    tracing::info!(
        "Configured for {} (sap-client {}), BPA {}",
        runtime_config.endpoint.root(),
        runtime_config.endpoint.client(),
        if runtime_config.bpa.is_some() { "enabled" } else { "disabled" }
    );

    let tools = Arc::new(SapTools::from_config(runtime_config).context("failed to build SAP client")?);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let server = SapMcpServer::new(tools);
            tracing::info!("MCP Server ready, listening on stdio...");
            run_stdio_loop(server).await
        }
        Command::Rest { bind } => rest::serve(bind, tools)
            .await
            .with_context(|| format!("REST server on {} failed", bind)),
    }
}

async fn run_stdio_loop(server: SapMcpServer) -> anyhow::Result<()> {
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next().await {
        let line = line.context("failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        tracing::debug!("Received: {}", line);

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let error_response =
                    JsonRpcResponse::error(None, PARSE_ERROR, &format!("Parse error: {}", e));
                send_response(&mut stdout, &error_response).await?;
                continue;
            }
        };

        if let Some(response) = server.handle_request(request).await {
            send_response(&mut stdout, &response).await?;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

async fn send_response(stdout: &mut Stdout, response: &JsonRpcResponse) -> anyhow::Result<()> {
    let mut json = serde_json::to_string(response)?;
    tracing::debug!("Sending: {}", json);
    json.push('\n');
    stdout.write_all(json.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
