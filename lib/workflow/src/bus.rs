//! Publish/subscribe transport for domain events.
//!
//! Producers publish [`DomainEvent`]s; the trigger dispatcher subscribes.
//! With the NATS implementation subscribers join a queue group, so each
//! event is dispatched by exactly one engine process.

use crate::error::BusError;
use crate::trigger::DomainEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

/// Stream of events from a subscription.
pub type EventStream = BoxStream<'static, Result<DomainEvent, BusError>>;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), BusError>;

    async fn subscribe(&self) -> Result<EventStream, BusError>;
}

/// Event bus for a single process, backed by a broadcast channel.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl InMemoryEventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<(), BusError> {
        if self.sender.send(event).is_err() {
            tracing::debug!("no subscribers, event dropped");
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, BusError> {
        let receiver = self.sender.subscribe();
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    Some((Err(BusError::Lagged { skipped }), receiver))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(Box::pin(stream))
    }
}
