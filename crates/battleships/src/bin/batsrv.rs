//! Serves Battleships games over HTTP.

use std::sync::Arc;

use clap::Parser;
use remoter::ServerConfig;
use remoter::TransportServer;
use remoter::config::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(name = "batsrv", about = "Host Battleships games")]
struct Arguments {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Arguments::parse();
    let config = ServerConfig::default().host(args.host).port(args.port);

    let listener = TransportServer::bind(&config).await?;
    TransportServer::new(Arc::new(battleships::registry()))
        .serve(listener)
        .await?;
    Ok(())
}
