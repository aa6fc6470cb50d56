// d365fo-cache-mcp/src/main.rs

use clap::Parser;
use rmcp::transport::stdio;
use rmcp::ServiceExt;
use std::sync::Arc;

mod context;
mod server;
mod tools;

#[derive(Parser)]
#[command(name = "d365fo-cache-mcp")]
#[command(about = "MCP stdio server exposing the D365 F&O metadata cache", long_about = None)]
#[command(version)]
struct Cli {
    /// Profile name, or a literal base URL, identifying the environment
    #[arg(long, short, default_value = "default")]
    env: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tool call responses and notifications share stdout with the JSON-RPC
    // transport, so logs must go to stderr or they'd corrupt the stream.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let core = Arc::new(context::open(&cli.env)?);
    let handler = server::D365foCacheServer::new(core);

    tracing::info!(env = %cli.env, "starting d365fo-cache-mcp");

    let service = handler.serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
