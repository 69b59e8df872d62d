//! In-process broker with AMQP default-exchange semantics.
//!
//! Used by tests and by embedders that run the conversion service in the
//! same process. Queues buffer messages until a consumer takes them and
//! outlive their consumers, so a later consumer picks up where an earlier
//! one stopped. Each queue has at most one consumer at a time; exclusive
//! queues are deleted when their owning session closes or is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::traits::{
    AckMode, Acker, Delivery, DeliveryStream, Message, Session, Transport,
};

/// Shared in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueEntry>,
    next_session: u64,
    next_consumer: u64,
    refuse_connections: bool,
}

struct QueueEntry {
    queue: Arc<Queue>,
    /// Session that declared the queue exclusive.
    owner: Option<u64>,
}

#[derive(Default)]
struct Queue {
    inner: Mutex<QueueInner>,
    changed: Notify,
}

#[derive(Default)]
struct QueueInner {
    messages: VecDeque<Message>,
    /// Tag of the active consumer.
    consumer: Option<u64>,
    /// Unacked deliveries handed to the active consumer.
    in_flight: usize,
    deleted: bool,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, message: Message) {
        self.lock().messages.push_back(message);
        self.changed.notify_waiters();
    }

    fn cancel_consumer(&self, tag: u64) {
        let mut inner = self.lock();
        if inner.consumer == Some(tag) {
            inner.consumer = None;
            inner.in_flight = 0;
        }
        drop(inner);
        self.changed.notify_waiters();
    }

    fn delete(&self) {
        self.lock().deleted = true;
        self.changed.notify_waiters();
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `open` calls fail, as if the broker were down.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }

    /// Messages waiting on `name`, not counting unacked deliveries.
    pub fn queue_depth(&self, name: &str) -> Option<usize> {
        let state = self.lock();
        state.queues.get(name).map(|entry| entry.queue.lock().messages.len())
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // Lock order is broker, then queue. State stays consistent across a
        // panicking holder: every mutation is a single insert or remove.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self) -> Result<Box<dyn Session>, TransportError> {
        let mut state = self.lock();
        if state.refuse_connections {
            return Err(TransportError::Connect("connection refused".into()));
        }
        state.next_session += 1;
        let id = state.next_session;
        debug!(session = id, "Memory session opened");
        Ok(Box::new(MemorySession {
            id,
            broker: self.clone(),
            owned: Vec::new(),
            consumers: Vec::new(),
            closed: false,
        }))
    }
}

/// Session on a [`MemoryBroker`].
pub struct MemorySession {
    id: u64,
    broker: MemoryBroker,
    owned: Vec<String>,
    consumers: Vec<(Arc<Queue>, u64)>,
    closed: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for (queue, tag) in self.consumers.drain(..) {
            queue.cancel_consumer(tag);
        }
        let mut state = self.broker.lock();
        for name in self.owned.drain(..) {
            if let Some(entry) = state.queues.remove(&name) {
                entry.queue.delete();
            }
            debug!(session = self.id, queue = %name, "Exclusive queue deleted");
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn declare_queue(&mut self, name: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        let locked = state
            .queues
            .get(name)
            .map(|entry| entry.owner.is_some_and(|owner| owner != self.id));
        match locked {
            Some(true) => Err(TransportError::ResourceLocked {
                queue: name.to_string(),
            }),
            Some(false) => Ok(()),
            None => {
                state.queues.insert(
                    name.to_string(),
                    QueueEntry {
                        queue: Arc::default(),
                        owner: None,
                    },
                );
                Ok(())
            }
        }
    }

    async fn declare_reply_queue(&mut self) -> Result<String, TransportError> {
        self.ensure_open()?;
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());
        self.broker.lock().queues.insert(
            name.clone(),
            QueueEntry {
                queue: Arc::default(),
                owner: Some(self.id),
            },
        );
        self.owned.push(name.clone());
        Ok(name)
    }

    async fn consume(&mut self, queue: &str, mode: AckMode) -> Result<DeliveryStream, TransportError> {
        self.ensure_open()?;
        let mut state = self.broker.lock();
        let Some(entry) = state.queues.get(queue) else {
            return Err(TransportError::Consume {
                queue: queue.to_string(),
                reason: "no such queue".into(),
            });
        };
        if entry.owner.is_some_and(|owner| owner != self.id) {
            return Err(TransportError::ResourceLocked {
                queue: queue.to_string(),
            });
        }
        let shared = Arc::clone(&entry.queue);
        {
            let mut inner = shared.lock();
            if inner.consumer.is_some() {
                return Err(TransportError::Consume {
                    queue: queue.to_string(),
                    reason: "queue already has a consumer".into(),
                });
            }
            state.next_consumer += 1;
            inner.consumer = Some(state.next_consumer);
            inner.in_flight = 0;
        }
        let tag = state.next_consumer;
        drop(state);

        self.consumers.push((Arc::clone(&shared), tag));
        debug!(session = self.id, queue = %queue, tag, ?mode, "Consumer attached");

        let consumer = Consumer {
            queue: shared,
            tag,
            mode,
        };
        Ok(Box::pin(stream::unfold(consumer, |consumer| async move {
            let delivery = consumer.next_delivery().await?;
            Some((Ok::<Delivery, TransportError>(delivery), consumer))
        })))
    }

    async fn publish(&mut self, routing_key: &str, message: Message) -> Result<(), TransportError> {
        self.ensure_open()?;
        let state = self.broker.lock();
        match state.queues.get(routing_key) {
            Some(entry) => entry.queue.push(message),
            None => {
                debug!(routing_key = %routing_key, "Unroutable message dropped");
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

/// State behind one consumer stream. Dropping it frees the queue for the
/// next consumer.
struct Consumer {
    queue: Arc<Queue>,
    tag: u64,
    mode: AckMode,
}

impl Consumer {
    /// Wait for the next message, or `None` once the consumer is cancelled
    /// or the queue deleted.
    async fn next_delivery(&self) -> Option<Delivery> {
        loop {
            let changed = self.queue.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if let Some(next) = self.try_take() {
                return next;
            }
            changed.await;
        }
    }

    /// `Some(None)` ends the stream; `None` means wait.
    fn try_take(&self) -> Option<Option<Delivery>> {
        let mut inner = self.queue.lock();
        if inner.deleted || inner.consumer != Some(self.tag) {
            return Some(None);
        }
        match self.mode {
            AckMode::Auto => {
                let message = inner.messages.pop_front()?;
                Some(Some(Delivery::settled(message)))
            }
            AckMode::Manual { prefetch } => {
                if inner.in_flight >= usize::from(prefetch.max(1)) {
                    return None;
                }
                let message = inner.messages.pop_front()?;
                inner.in_flight += 1;
                let acker = MemoryAcker {
                    queue: Arc::clone(&self.queue),
                    tag: self.tag,
                    unacked: Some(message.clone()),
                };
                Some(Some(Delivery::with_acker(message, Box::new(acker))))
            }
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.queue.cancel_consumer(self.tag);
    }
}

/// Acks a manual delivery; if dropped unacked, puts the message back at the
/// head of its queue.
struct MemoryAcker {
    queue: Arc<Queue>,
    tag: u64,
    unacked: Option<Message>,
}

impl MemoryAcker {
    fn settle(&mut self, requeue: bool) {
        let Some(message) = self.unacked.take() else {
            return;
        };
        let mut inner = self.queue.lock();
        if inner.consumer == Some(self.tag) {
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        if requeue && !inner.deleted {
            inner.messages.push_front(message);
        }
        drop(inner);
        self.queue.changed.notify_waiters();
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&mut self) -> Result<(), TransportError> {
        self.settle(false);
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if self.unacked.is_some() {
            debug!(tag = self.tag, "Unacked delivery requeued");
        }
        self.settle(true);
    }
}
