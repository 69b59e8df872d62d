use std::path::PathBuf;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use latex2gmd::config::{RpcConfig, ServerConfig};
use latex2gmd::rpc::{MarkdownHandler, RpcServer};
use latex2gmd::transport::AmqpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let rpc_config = RpcConfig::from_env().context("Invalid RPC configuration")?;
    let mut server_config = ServerConfig::from_env().context("Invalid server configuration")?;
    match std::env::args_os().nth(1) {
        Some(path) => server_config.output_path = PathBuf::from(path),
        None => eprintln!(
            "No output file given, writing to {}",
            server_config.output_path.display()
        ),
    }

    let transport = AmqpTransport::new(rpc_config.amqp_url.clone());
    let server = RpcServer::bind(&transport, &rpc_config.request_queue)
        .await
        .context("Failed to bind request queue")?
        .with_max_requests(server_config.max_requests);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                cancel.cancel();
            }
        });
    }

    let handler = MarkdownHandler::new(server_config.output_path);
    let answered = server.serve(&handler, &cancel).await?;
    info!(answered, "Server stopped");
    Ok(())
}
