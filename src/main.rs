use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use latex2gmd::app;
use latex2gmd::config::{PipelineConfig, RpcConfig};
use latex2gmd::pipeline::Tokenizer;
use latex2gmd::rpc::RpcClient;
use latex2gmd::transport::AmqpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let Some(input) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("Usage: latex2gmd <input.tex>");
        eprintln!("  Converts a LaTeX file to GitHub-flavored Markdown via the conversion service.");
        return Ok(());
    };

    let pipeline_config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let rpc_config = RpcConfig::from_env().context("Invalid RPC configuration")?;

    let tokenizer = Tokenizer::latex(&pipeline_config);
    let transport = Arc::new(AmqpTransport::new(rpc_config.amqp_url.clone()));
    let client = RpcClient::new(transport, &rpc_config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let response = app::convert(&tokenizer, &client, &input, &cancel)
        .await
        .with_context(|| format!("Failed to convert {}", input.display()))?;

    match response.length() {
        Some(length) => info!(length, "Conversion complete"),
        None => info!(payload = ?response.payload, "Conversion complete"),
    }
    Ok(())
}
