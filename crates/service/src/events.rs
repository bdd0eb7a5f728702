//! Post-commit domain event dispatch.
//!
//! Services collect events in an [`EventBuffer`] while a command runs and
//! hand the buffer to [`EventBus::publish`] only after the repository call
//! that persisted the command succeeded. Publishing never fails the
//! command: an event the dispatcher refuses is written to the outbox and
//! retried by [`EventBus::dispatch_outbox`].

use std::sync::Arc;

use boxrent_core::{Clock, DomainEvent, EventEnvelope};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::error::Result;
use crate::repository::OutboxRepository;
use crate::services::BatchReport;

/// Why an event could not be handed to its consumers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("event channel is full")]
    Full,
    #[error("event channel is closed")]
    Closed,
    #[error("event dispatch failed: {0}")]
    Failed(String),
}

/// Hands events to whatever consumes them.
pub trait EventDispatcher: Send + Sync {
    /// Must not block.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError` if the event was not accepted.
    fn dispatch(&self, envelope: &EventEnvelope) -> std::result::Result<(), DispatchError>;
}

/// Events raised by one command, not yet published.
#[derive(Debug, Default)]
#[must_use = "buffered events are lost unless published"]
pub struct EventBuffer {
    events: Vec<DomainEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// =============================================================================
// Channel Dispatcher
// =============================================================================

/// Dispatcher feeding a bounded in-process channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::Sender<EventEnvelope>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Spawn a consumer that records every event in the log.
    ///
    /// Notification delivery (e-mail for `ContractExpiringSoon` and the
    /// like) hangs off this stream outside the rental core.
    pub fn spawn_logging_consumer(mut receiver: mpsc::Receiver<EventEnvelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                let payload = serde_json::to_string(&envelope.event).unwrap_or_default();
                tracing::info!(
                    event_id = %envelope.id,
                    event_type = envelope.event.name(),
                    occurred_at = %envelope.occurred_at,
                    payload = %payload,
                    "Domain event"
                );
            }
            tracing::debug!("Event channel closed, consumer stopping");
        })
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, envelope: &EventEnvelope) -> std::result::Result<(), DispatchError> {
        self.sender
            .try_send(envelope.clone())
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DispatchError::Full,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Publishes buffered events with an outbox fallback.
#[derive(Clone)]
pub struct EventBus {
    dispatcher: Arc<dyn EventDispatcher>,
    outbox: Arc<dyn OutboxRepository>,
    clock: Arc<dyn Clock>,
}

impl EventBus {
    #[must_use]
    pub fn new(
        dispatcher: Arc<dyn EventDispatcher>,
        outbox: Arc<dyn OutboxRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dispatcher,
            outbox,
            clock,
        }
    }

    /// Dispatch every buffered event; refused events go to the outbox.
    pub async fn publish(&self, buffer: EventBuffer) {
        for event in buffer.events {
            let envelope = EventEnvelope::new(event, self.clock.now());
            if let Err(err) = self.dispatcher.dispatch(&envelope) {
                tracing::warn!(
                    event_id = %envelope.id,
                    event_type = envelope.event.name(),
                    error = %err,
                    "Event dispatch failed, queueing in outbox"
                );
                if let Err(db_err) = self.outbox.enqueue(&envelope, &err.to_string()).await {
                    tracing::error!(
                        event_id = %envelope.id,
                        event_type = envelope.event.name(),
                        error = %db_err,
                        "Failed to queue event in outbox, event lost"
                    );
                }
            }
        }
    }

    /// Retry up to `limit` queued events, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the outbox cannot be read.
    #[instrument(skip(self))]
    pub async fn dispatch_outbox(&self, limit: i64) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for entry in self.outbox.pending(limit).await? {
            let envelope = &entry.envelope;
            match self.dispatcher.dispatch(envelope) {
                Ok(()) => {
                    self.outbox
                        .mark_dispatched(envelope.id, self.clock.now())
                        .await?;
                    report.success(format!(
                        "[SENT] {} {} (attempt {})",
                        envelope.id,
                        envelope.event.name(),
                        entry.attempts + 1
                    ));
                }
                Err(err) => {
                    self.outbox
                        .record_failure(envelope.id, &err.to_string())
                        .await?;
                    report.failure(format!(
                        "[ERROR] {} {}: {err}",
                        envelope.id,
                        envelope.event.name()
                    ));
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxrent_core::{FixedClock, OrderId, StorageId};
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::memory::InMemoryStore;

    fn expired(id: i32) -> DomainEvent {
        DomainEvent::OrderExpired {
            order_id: OrderId::new(id),
            storage_id: StorageId::new(1),
        }
    }

    fn bus(
        dispatcher: Arc<dyn EventDispatcher>,
        store: &Arc<InMemoryStore>,
    ) -> EventBus {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap());
        EventBus::new(dispatcher, store.clone(), Arc::new(clock))
    }

    #[tokio::test]
    async fn test_full_channel_falls_back_to_outbox() {
        let store = Arc::new(InMemoryStore::new());
        let (dispatcher, mut receiver) = ChannelDispatcher::new(1);
        let bus = bus(Arc::new(dispatcher), &store);

        let mut buffer = EventBuffer::new();
        buffer.push(expired(1));
        buffer.push(expired(2));
        bus.publish(buffer).await;

        assert_eq!(receiver.recv().await.unwrap().event, expired(1));
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].envelope.event, expired(2));
        assert_eq!(pending[0].last_error.as_deref(), Some("event channel is full"));

        // Channel drained, the retry goes through
        let report = bus.dispatch_outbox(10).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(receiver.recv().await.unwrap().event, expired(2));
        assert!(store.pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_channel_keeps_event_pending() {
        let store = Arc::new(InMemoryStore::new());
        let (dispatcher, receiver) = ChannelDispatcher::new(4);
        drop(receiver);
        let bus = bus(Arc::new(dispatcher), &store);

        let mut buffer = EventBuffer::new();
        buffer.push(expired(7));
        bus.publish(buffer).await;

        let report = bus.dispatch_outbox(10).await.unwrap();
        assert_eq!(report.failed, 1);
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending[0].attempts, 2);
        assert_eq!(pending[0].last_error.as_deref(), Some("event channel is closed"));
    }
}
