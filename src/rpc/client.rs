//! RPC client: synchronous call semantics over a publish/subscribe broker.
//!
//! Each call:
//! 1. opens its own session (connection + channel)
//! 2. declares a private, broker-named reply queue
//! 3. starts consuming that queue
//! 4. only then publishes the request, tagged with a fresh correlation token
//! 5. waits for the reply carrying that token, ignoring everything else
//! 6. closes the session, whatever the outcome
//!
//! Because every call gets its own reply queue, concurrent calls (from one
//! client or many) never see each other's replies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RpcConfig;
use crate::error::RpcError;
use crate::pipeline::types::OrderedRecords;
use crate::rpc::types::{RpcEnvelope, RpcResponse};
use crate::transport::traits::{AckMode, DeliveryStream, Session, Transport};

/// Calls the conversion service.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    request_queue: String,
    reply_timeout: Option<Duration>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, config: &RpcConfig) -> Self {
        Self {
            transport,
            request_queue: config.request_queue.clone(),
            reply_timeout: config.reply_timeout,
        }
    }

    /// Send `records` and wait for the correlated reply, up to the
    /// configured deadline.
    pub async fn call(&self, records: &OrderedRecords) -> Result<RpcResponse, RpcError> {
        self.call_with_cancel(records, &CancellationToken::new()).await
    }

    /// Like [`call`](Self::call), but gives up with [`RpcError::Cancelled`]
    /// as soon as `cancel` fires.
    pub async fn call_with_cancel(
        &self,
        records: &OrderedRecords,
        cancel: &CancellationToken,
    ) -> Result<RpcResponse, RpcError> {
        let mut session = self.transport.open().await?;
        let result = self.exchange(session.as_mut(), records, cancel).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close RPC session");
        }
        result
    }

    async fn exchange(
        &self,
        session: &mut dyn Session,
        records: &OrderedRecords,
        cancel: &CancellationToken,
    ) -> Result<RpcResponse, RpcError> {
        let reply_queue = session.declare_reply_queue().await?;
        let mut replies = session.consume(&reply_queue, AckMode::Auto).await?;

        let envelope = RpcEnvelope::for_records(records, reply_queue)?;
        let correlation_id = envelope.correlation_id.clone();
        info!(
            transport = self.transport.name(),
            queue = %self.request_queue,
            correlation_id = %correlation_id,
            records = records.len(),
            "Publishing RPC request"
        );
        session
            .publish(&self.request_queue, envelope.into_message())
            .await?;

        let wait = with_deadline(await_reply(&mut replies, &correlation_id), self.reply_timeout);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            result = wait => result,
        }?;

        info!(correlation_id = %correlation_id, "RPC reply received");
        Ok(response)
    }
}

/// Consume `replies` until one carries `correlation_id`.
async fn await_reply(replies: &mut DeliveryStream, correlation_id: &str) -> Result<RpcResponse, RpcError> {
    while let Some(delivery) = replies.next().await {
        let message = delivery?.message;
        if message.correlation_id.as_deref() == Some(correlation_id) {
            return RpcResponse::from_message(message);
        }
        debug!(
            received = ?message.correlation_id,
            expected = %correlation_id,
            "Discarding uncorrelated reply"
        );
    }
    Err(RpcError::ReplyStreamClosed)
}

async fn with_deadline<T>(
    fut: impl Future<Output = Result<T, RpcError>>,
    deadline: Option<Duration>,
) -> Result<T, RpcError> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| RpcError::Timeout(limit))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::error::TransportError;
    use crate::pipeline::collector::order_records;
    use crate::pipeline::types::Record;
    use crate::transport::memory::MemoryBroker;
    use crate::transport::traits::Message;

    fn config(timeout_ms: Option<u64>) -> RpcConfig {
        RpcConfig {
            request_queue: "rpc_queue".into(),
            reply_timeout: timeout_ms.map(Duration::from_millis),
            ..RpcConfig::default()
        }
    }

    fn records() -> OrderedRecords {
        order_records(vec![Record::new(0, "# Hi", false)], 1).unwrap()
    }

    /// Answer one request with `payload`, first sending a decoy reply with a
    /// foreign correlation token.
    async fn spawn_responder(broker: &MemoryBroker, payload: &'static str) -> tokio::task::JoinHandle<Vec<u8>> {
        let mut session = broker.open().await.unwrap();
        session.declare_queue("rpc_queue").await.unwrap();
        let mut requests = session.consume("rpc_queue", AckMode::Auto).await.unwrap();

        tokio::spawn(async move {
            let request = requests.next().await.unwrap().unwrap().message;
            let reply_to = request.reply_to.clone().unwrap();
            session
                .publish(
                    &reply_to,
                    Message::json(br#"{"length": -1}"#.to_vec()).with_correlation_id("someone-else"),
                )
                .await
                .unwrap();
            session
                .publish(
                    &reply_to,
                    Message::json(payload.as_bytes().to_vec())
                        .with_correlation_id(request.correlation_id.clone().unwrap()),
                )
                .await
                .unwrap();
            request.body
        })
    }

    #[tokio::test]
    async fn call_returns_correlated_reply_only() {
        let broker = MemoryBroker::new();
        let responder = spawn_responder(&broker, r#"{"length": 1}"#).await;

        let client = RpcClient::new(Arc::new(broker.clone()), &config(Some(2_000)));
        let response = client.call(&records()).await.unwrap();

        assert_eq!(response.payload, BTreeMap::from([("length".to_string(), 1)]));
        let body: serde_json::Value = serde_json::from_slice(&responder.await.unwrap()).unwrap();
        assert_eq!(body[0]["Data"], "# Hi");
    }

    #[tokio::test]
    async fn reply_queue_released_after_call() {
        let broker = MemoryBroker::new();
        let responder = spawn_responder(&broker, r#"{"length": 1}"#).await;
        let client = RpcClient::new(Arc::new(broker.clone()), &config(Some(2_000)));
        client.call(&records()).await.unwrap();
        responder.await.unwrap();

        // Only the request queue is left.
        assert_eq!(broker.queue_count(), 1);
        assert!(broker.queue_exists("rpc_queue"));
    }

    #[tokio::test]
    async fn timeout_releases_reply_queue() {
        let broker = MemoryBroker::new();
        let mut server = broker.open().await.unwrap();
        server.declare_queue("rpc_queue").await.unwrap();

        let client = RpcClient::new(Arc::new(broker.clone()), &config(Some(50)));
        let err = client.call(&records()).await.unwrap_err();

        assert!(matches!(err, RpcError::Timeout(_)));
        assert_eq!(broker.queue_count(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let broker = MemoryBroker::new();
        let client = RpcClient::new(Arc::new(broker.clone()), &config(None));
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let err = client.call_with_cancel(&records(), &cancel).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, RpcError::Cancelled));
        assert_eq!(broker.queue_count(), 0);
    }

    #[tokio::test]
    async fn malformed_reply_is_an_error() {
        let broker = MemoryBroker::new();
        let responder = spawn_responder(&broker, "1").await;
        let client = RpcClient::new(Arc::new(broker.clone()), &config(Some(2_000)));

        let err = client.call(&records()).await.unwrap_err();
        responder.await.unwrap();
        assert!(matches!(err, RpcError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn connection_failure_is_propagated() {
        let broker = MemoryBroker::new();
        broker.set_refuse_connections(true);
        let client = RpcClient::new(Arc::new(broker), &config(Some(100)));

        let err = client.call(&records()).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(TransportError::Connect(_))));
    }
}
