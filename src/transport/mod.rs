//! Publish/subscribe transport: broker sessions behind one trait.
//!
//! - `MemoryBroker`: in-process broker, always available
//! - `AmqpTransport`: RabbitMQ and friends via `lapin` (feature `amqp`)

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;
pub mod traits;

#[cfg(feature = "amqp")]
pub use amqp::AmqpTransport;
pub use memory::MemoryBroker;
pub use traits::{Delivery, DeliveryStream, Message, Session, Transport};
