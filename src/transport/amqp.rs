//! AMQP 0-9-1 backend built on `lapin`.
//!
//! Each session owns one connection and one channel, with publisher confirms
//! enabled. Reply queues are server-named, exclusive and auto-delete, so the
//! broker removes them when the connection goes away even if `close` is
//! never reached. Manual-ack consumers set the channel prefetch; anything
//! still unacked when the channel closes is requeued by the broker.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::traits::{AckMode, Acker, Delivery, DeliveryStream, Message, Session, Transport};

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

/// Connects to an AMQP broker such as RabbitMQ.
pub struct AmqpTransport {
    url: SecretString,
}

impl AmqpTransport {
    pub fn new(url: SecretString) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    fn name(&self) -> &str {
        "amqp"
    }

    async fn open(&self) -> Result<Box<dyn Session>, TransportError> {
        let connection = Connection::connect(self.url.expose_secret(), ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "channel open failed").await {
                    warn!(error = %close_err, "Failed to close AMQP connection");
                }
                return Err(TransportError::Channel(e.to_string()));
            }
        };

        if let Err(e) = channel.confirm_select(ConfirmSelectOptions::default()).await {
            if let Err(close_err) = connection.close(REPLY_SUCCESS, "confirm select failed").await {
                warn!(error = %close_err, "Failed to close AMQP connection");
            }
            return Err(TransportError::Channel(format!("enable publisher confirms: {e}")));
        }

        info!(channel = channel.id(), "AMQP session opened");
        Ok(Box::new(AmqpSession {
            connection,
            channel,
            closed: false,
        }))
    }
}

/// One connection + channel on an AMQP broker.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
    closed: bool,
}

impl AmqpSession {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Session for AmqpSession {
    async fn declare_queue(&mut self, name: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.channel
            .queue_declare(name, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(|e| TransportError::Declare {
                queue: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn declare_reply_queue(&mut self) -> Result<String, TransportError> {
        self.ensure_open()?;
        let options = QueueDeclareOptions {
            exclusive: true,
            auto_delete: true,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .channel
            .queue_declare("", options, FieldTable::default())
            .await
            .map_err(|e| TransportError::Declare {
                queue: "<server-named>".to_string(),
                reason: e.to_string(),
            })?;
        debug!(queue = %queue.name().as_str(), "Declared reply queue");
        Ok(queue.name().as_str().to_owned())
    }

    async fn consume(&mut self, queue: &str, mode: AckMode) -> Result<DeliveryStream, TransportError> {
        self.ensure_open()?;
        let consume_err = |e: lapin::Error| TransportError::Consume {
            queue: queue.to_string(),
            reason: e.to_string(),
        };

        if let AckMode::Manual { prefetch } = mode {
            self.channel
                .basic_qos(prefetch, BasicQosOptions::default())
                .await
                .map_err(consume_err)?;
        }
        let options = BasicConsumeOptions {
            no_ack: mode == AckMode::Auto,
            ..BasicConsumeOptions::default()
        };
        let consumer = self
            .channel
            .basic_consume(queue, "", options, FieldTable::default())
            .await
            .map_err(consume_err)?;

        Ok(Box::pin(consumer.map(move |delivery| {
            delivery
                .map(|delivery| into_delivery(delivery, mode))
                .map_err(|e| TransportError::Delivery(e.to_string()))
        })))
    }

    async fn publish(&mut self, routing_key: &str, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        let publish_err = |e: lapin::Error| TransportError::Publish {
            routing_key: routing_key.to_string(),
            reason: e.to_string(),
        };

        let mut properties = BasicProperties::default();
        if let Some(content_type) = message.content_type {
            properties = properties.with_content_type(ShortString::from(content_type));
        }
        if let Some(correlation_id) = message.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id));
        }
        if let Some(reply_to) = message.reply_to {
            properties = properties.with_reply_to(ShortString::from(reply_to));
        }

        let confirmation = self
            .channel
            .basic_publish(
                "",
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(publish_err)?
            .await
            .map_err(publish_err)?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(TransportError::Publish {
                routing_key: routing_key.to_string(),
                reason: "broker nacked the message".into(),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let channel = self.channel.close(REPLY_SUCCESS, "OK").await;
        let connection = self.connection.close(REPLY_SUCCESS, "OK").await;
        debug!("AMQP session closed");

        channel
            .and(connection)
            .map_err(|e| TransportError::Channel(format!("close failed: {e}")))
    }
}

fn into_delivery(delivery: lapin::message::Delivery, mode: AckMode) -> Delivery {
    let properties = &delivery.properties;
    let correlation_id = properties
        .correlation_id()
        .as_ref()
        .map(|s| s.as_str().to_owned());
    let reply_to = properties.reply_to().as_ref().map(|s| s.as_str().to_owned());
    let content_type = properties
        .content_type()
        .as_ref()
        .map(|s| s.as_str().to_owned());

    let message = Message {
        body: delivery.data,
        correlation_id,
        reply_to,
        content_type,
    };
    match mode {
        AckMode::Auto => Delivery::settled(message),
        AckMode::Manual { .. } => Delivery::with_acker(message, Box::new(AmqpAcker(delivery.acker))),
    }
}

/// Sends `basic.ack` for one delivery tag.
struct AmqpAcker(lapin::acker::Acker);

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&mut self) -> Result<(), TransportError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Delivery(format!("ack failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_name() {
        let transport = AmqpTransport::new(SecretString::from("amqp://localhost:5672/"));
        assert_eq!(transport.name(), "amqp");
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connect_error() {
        // Port 1 on loopback refuses connections.
        let transport = AmqpTransport::new(SecretString::from("amqp://127.0.0.1:1/"));
        let err = transport.open().await.err().unwrap();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
