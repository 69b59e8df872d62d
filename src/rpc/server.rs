//! RPC server: the conversion-service side of the request queue.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RpcError;
use crate::pipeline::types::Record;
use crate::render::render_markdown;
use crate::transport::traits::{AckMode, Delivery, DeliveryStream, Message, Session, Transport};

/// Requests handed to the server before the previous one is acked.
const REQUEST_PREFETCH: u16 = 1;

/// Turns one decoded request into a reply payload.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, records: Vec<Record>) -> Result<BTreeMap<String, i64>, RpcError>;
}

#[async_trait]
impl<F> RequestHandler for F
where
    F: Fn(Vec<Record>) -> BTreeMap<String, i64> + Send + Sync,
{
    async fn handle(&self, records: Vec<Record>) -> Result<BTreeMap<String, i64>, RpcError> {
        Ok(self(records))
    }
}

/// Renders requests to a markdown file and replies with the record count.
pub struct MarkdownHandler {
    output_path: PathBuf,
}

impl MarkdownHandler {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

#[async_trait]
impl RequestHandler for MarkdownHandler {
    async fn handle(&self, records: Vec<Record>) -> Result<BTreeMap<String, i64>, RpcError> {
        let markdown = render_markdown(&records);
        tokio::fs::write(&self.output_path, markdown.as_bytes())
            .await
            .map_err(|e| RpcError::Handler(format!("write {}: {e}", self.output_path.display())))?;
        info!(
            path = %self.output_path.display(),
            records = records.len(),
            bytes = markdown.len(),
            "Markdown written"
        );
        Ok(BTreeMap::from([("length".to_string(), records.len() as i64)]))
    }
}

/// Entry point for serving a request queue.
pub struct RpcServer;

impl RpcServer {
    /// Open a session, declare `request_queue` and start consuming it.
    ///
    /// Requests published once this returns are never lost. The server takes
    /// one request at a time and acks it only after replying, so requests it
    /// never gets to stay queued for the next server.
    pub async fn bind(transport: &dyn Transport, request_queue: &str) -> Result<BoundServer, RpcError> {
        let mut session = transport.open().await?;
        let requests = match declare_and_consume(session.as_mut(), request_queue).await {
            Ok(requests) => requests,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "Failed to close server session");
                }
                return Err(e);
            }
        };
        info!(transport = transport.name(), queue = %request_queue, "Awaiting RPC requests");
        Ok(BoundServer {
            session,
            requests,
            max_requests: None,
        })
    }
}

async fn declare_and_consume(session: &mut dyn Session, queue: &str) -> Result<DeliveryStream, RpcError> {
    session.declare_queue(queue).await?;
    let mode = AckMode::Manual {
        prefetch: REQUEST_PREFETCH,
    };
    Ok(session.consume(queue, mode).await?)
}

/// A server that is already consuming its request queue.
pub struct BoundServer {
    session: Box<dyn Session>,
    requests: DeliveryStream,
    max_requests: Option<usize>,
}

impl BoundServer {
    /// Stop after answering `max` requests. `None` serves until cancelled.
    pub fn with_max_requests(mut self, max: Option<usize>) -> Self {
        self.max_requests = max;
        self
    }

    /// Answer requests until the limit is reached, `cancel` fires or the
    /// queue goes away. Returns how many requests were answered.
    pub async fn serve(
        mut self,
        handler: &dyn RequestHandler,
        cancel: &CancellationToken,
    ) -> Result<usize, RpcError> {
        let result = self.serve_loop(handler, cancel).await;
        if let Err(e) = self.session.close().await {
            warn!(error = %e, "Failed to close server session");
        }
        result
    }

    async fn serve_loop(
        &mut self,
        handler: &dyn RequestHandler,
        cancel: &CancellationToken,
    ) -> Result<usize, RpcError> {
        let mut answered = 0;
        while self.max_requests.is_none_or(|max| answered < max) {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(answered, "Server cancelled");
                    return Ok(answered);
                }
                next = self.requests.next() => next,
            };
            let Some(delivery) = next else {
                debug!("Request stream ended");
                break;
            };
            if self.answer(handler, delivery?).await? {
                answered += 1;
            }
        }
        Ok(answered)
    }

    /// Reply, then ack. Returns `false` when the request was skipped.
    ///
    /// If handling fails the delivery is left unacked and goes back on the
    /// queue.
    async fn answer(&mut self, handler: &dyn RequestHandler, delivery: Delivery) -> Result<bool, RpcError> {
        let answered = self.reply(handler, &delivery.message).await?;
        delivery.ack().await?;
        Ok(answered)
    }

    async fn reply(&mut self, handler: &dyn RequestHandler, request: &Message) -> Result<bool, RpcError> {
        let Some(reply_to) = request.reply_to.as_deref() else {
            warn!(correlation_id = ?request.correlation_id, "Request without reply_to, skipping");
            return Ok(false);
        };
        let records: Vec<Record> = match serde_json::from_slice(&request.body) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, bytes = request.body.len(), "Malformed request, skipping");
                return Ok(false);
            }
        };

        let count = records.len();
        let payload = handler.handle(records).await?;
        let body = serde_json::to_vec(&payload).map_err(RpcError::Serialize)?;

        let mut reply = Message::json(body);
        if let Some(id) = &request.correlation_id {
            reply = reply.with_correlation_id(id.clone());
        }
        self.session.publish(reply_to, reply).await?;
        info!(records = count, reply_to = %reply_to, "Request answered");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::memory::MemoryBroker;

    fn count_handler(records: Vec<Record>) -> BTreeMap<String, i64> {
        BTreeMap::from([("length".to_string(), records.len() as i64)])
    }

    async fn request(broker: &MemoryBroker, body: &[u8], with_reply: bool) -> (Box<dyn Session>, DeliveryStream) {
        let mut session = broker.open().await.unwrap();
        let reply_queue = session.declare_reply_queue().await.unwrap();
        let replies = session.consume(&reply_queue, AckMode::Auto).await.unwrap();
        let mut message = Message::json(body.to_vec()).with_correlation_id("c-1");
        if with_reply {
            message = message.with_reply_to(reply_queue);
        }
        session.publish("rpc_queue", message).await.unwrap();
        (session, replies)
    }

    #[tokio::test]
    async fn answers_with_echoed_correlation_id() {
        let broker = MemoryBroker::new();
        let server = RpcServer::bind(&broker, "rpc_queue").await.unwrap().with_max_requests(Some(1));

        let body = br#"[{"Order":0,"Data":"x","ToggleMathMode":false}]"#;
        let (_session, mut replies) = request(&broker, body, true).await;

        let answered = server.serve(&count_handler, &CancellationToken::new()).await.unwrap();
        assert_eq!(answered, 1);

        let reply = replies.next().await.unwrap().unwrap().message;
        assert_eq!(reply.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(reply.body, br#"{"length":1}"#);
    }

    #[tokio::test]
    async fn skips_malformed_and_unaddressed_requests() {
        let broker = MemoryBroker::new();
        let server = RpcServer::bind(&broker, "rpc_queue").await.unwrap().with_max_requests(Some(1));

        let (_a, _) = request(&broker, b"not json", true).await;
        let (_b, _) = request(&broker, b"[]", false).await;
        let (_c, mut replies) = request(&broker, b"[]", true).await;

        let answered = server.serve(&count_handler, &CancellationToken::new()).await.unwrap();
        assert_eq!(answered, 1);
        assert_eq!(replies.next().await.unwrap().unwrap().message.body, br#"{"length":0}"#);
        assert_eq!(broker.queue_depth("rpc_queue"), Some(0));
    }

    #[tokio::test]
    async fn unserved_requests_stay_queued_for_next_server() {
        let broker = MemoryBroker::new();
        let first = RpcServer::bind(&broker, "rpc_queue").await.unwrap().with_max_requests(Some(1));

        let body = br#"[{"Order":0,"Data":"x","ToggleMathMode":false}]"#;
        let (_a, mut replies_a) = request(&broker, body, true).await;
        let (_b, mut replies_b) = request(&broker, b"[]", true).await;

        let answered = first.serve(&count_handler, &CancellationToken::new()).await.unwrap();
        assert_eq!(answered, 1);
        assert_eq!(replies_a.next().await.unwrap().unwrap().message.body, br#"{"length":1}"#);
        assert_eq!(broker.queue_depth("rpc_queue"), Some(1));

        let second = RpcServer::bind(&broker, "rpc_queue").await.unwrap().with_max_requests(Some(1));
        let answered = second.serve(&count_handler, &CancellationToken::new()).await.unwrap();
        assert_eq!(answered, 1);
        assert_eq!(replies_b.next().await.unwrap().unwrap().message.body, br#"{"length":0}"#);
        assert_eq!(broker.queue_depth("rpc_queue"), Some(0));
    }

    #[tokio::test]
    async fn failed_request_is_left_on_queue() {
        let broker = MemoryBroker::new();
        let server = RpcServer::bind(&broker, "rpc_queue").await.unwrap();
        let (_session, _replies) = request(&broker, b"[]", true).await;

        let handler = MarkdownHandler::new("/definitely/not/a/dir/out.md");
        let err = server.serve(&handler, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, RpcError::Handler(_)));
        assert_eq!(broker.queue_depth("rpc_queue"), Some(1));
    }

    #[tokio::test]
    async fn cancellation_stops_idle_server() {
        let broker = MemoryBroker::new();
        let server = RpcServer::bind(&broker, "rpc_queue").await.unwrap();
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { server.serve(&count_handler, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(task.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn markdown_handler_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.md");
        let handler = MarkdownHandler::new(&path);

        let records = vec![Record::new(0, "# Title", false), Record::empty(1), Record::new(2, "Body", false)];
        let payload = handler.handle(records).await.unwrap();

        assert_eq!(payload.get("length"), Some(&3));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Title\n\nBody\n");
    }

    #[tokio::test]
    async fn markdown_handler_reports_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let handler = MarkdownHandler::new(dir.path().join("missing").join("out.md"));
        let err = handler.handle(Vec::new()).await.unwrap_err();
        assert!(matches!(err, RpcError::Handler(_)));
    }
}
