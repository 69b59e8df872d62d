//! Broker-agnostic publish/subscribe interface.
//!
//! Modelled on AMQP 0-9-1 with the default exchange: a message published
//! with routing key `k` lands in the queue named `k`, or is dropped if no
//! such queue exists.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::TransportError;

/// An outbound message and its properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    /// Opaque token the responder echoes back.
    pub correlation_id: Option<String>,
    /// Queue the responder should publish its reply to.
    pub reply_to: Option<String>,
    pub content_type: Option<String>,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self::new(body).with_content_type("application/json")
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// How a consumer settles its deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Settled as soon as the broker hands the message out.
    #[default]
    Auto,
    /// At most `prefetch` unacknowledged deliveries at a time. A delivery
    /// that is never acked goes back on the queue for the next consumer.
    Manual { prefetch: u16 },
}

/// Settles one manually acknowledged delivery.
#[async_trait]
pub trait Acker: Send {
    async fn ack(&mut self) -> Result<(), TransportError>;
}

/// A message as received from a queue.
pub struct Delivery {
    pub message: Message,
    acker: Option<Box<dyn Acker>>,
}

impl Delivery {
    /// A delivery that needs no acknowledgement.
    pub fn settled(message: Message) -> Self {
        Self { message, acker: None }
    }

    pub fn with_acker(message: Message, acker: Box<dyn Acker>) -> Self {
        Self {
            message,
            acker: Some(acker),
        }
    }

    pub fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge the delivery. A no-op for auto-ack consumers.
    pub async fn ack(mut self) -> Result<(), TransportError> {
        match self.acker.take() {
            Some(mut acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("requires_ack", &self.requires_ack())
            .finish()
    }
}

/// Stream of deliveries from one consumer.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, TransportError>> + Send>>;

/// Something that can open broker sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Open one connection with one channel on it.
    async fn open(&self) -> Result<Box<dyn Session>, TransportError>;
}

/// One connection + channel, exclusively owned by its opener.
#[async_trait]
pub trait Session: Send {
    /// Declare a named, non-durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&mut self, name: &str) -> Result<(), TransportError>;

    /// Declare a broker-named queue that only this session may consume and
    /// that is deleted when the session closes. Returns the assigned name.
    async fn declare_reply_queue(&mut self) -> Result<String, TransportError>;

    /// Start consuming `queue`. Deliveries published after this returns are
    /// guaranteed to reach the stream. Dropping the stream cancels the
    /// consumer; messages still on the queue wait for the next one.
    async fn consume(&mut self, queue: &str, mode: AckMode) -> Result<DeliveryStream, TransportError>;

    /// Publish `message` to the queue named `routing_key`.
    async fn publish(&mut self, routing_key: &str, message: Message) -> Result<(), TransportError>;

    /// Close the channel and connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}
