//! One conversion round trip: tokenize a file, then ask the service.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::pipeline::Tokenizer;
use crate::rpc::{RpcClient, RpcResponse};

/// Tokenize `path` and send the ordered records to the conversion service.
///
/// An empty file still results in exactly one call, with an empty payload.
pub async fn convert(
    tokenizer: &Tokenizer,
    client: &RpcClient,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<RpcResponse> {
    let records = tokenizer
        .clone()
        .with_cancellation(cancel.child_token())
        .tokenize_file_async(path)
        .await?;
    info!(
        path = %path.display(),
        records = records.len(),
        workers = tokenizer.worker_count(),
        "Sending records"
    );

    Ok(client.call_with_cancel(&records, cancel).await?)
}
