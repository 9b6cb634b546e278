// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Orchestration Events
//
// In-memory event streaming over a tokio broadcast channel. The CLI, UIs and
// log shippers subscribe here; the orchestrator publishes through the
// `EventSink` port. Events are not persisted: the workflow aggregate keeps the
// authoritative history.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::{EventSink, OrchestrationEvent};
use crate::domain::workflow::WorkflowId;

/// Event bus for publishing and subscribing to orchestration events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<OrchestrationEvent>>,
}

impl EventBus {
    /// Capacity is how many events are buffered before slow receivers lag
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_event(&self, event: OrchestrationEvent) {
        debug!(
            workflow_id = %event.workflow_id,
            sequence = event.sequence,
            event_type = %event.event_type,
            "Publishing orchestration event"
        );

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to events from every workflow
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of a single workflow
    pub fn subscribe_workflow(&self, workflow_id: WorkflowId) -> WorkflowEventReceiver {
        WorkflowEventReceiver {
            receiver: self.sender.subscribe(),
            workflow_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: &OrchestrationEvent) {
        self.publish_event(event.clone());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all orchestration events
pub struct EventReceiver {
    receiver: broadcast::Receiver<OrchestrationEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<OrchestrationEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<OrchestrationEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to one workflow
pub struct WorkflowEventReceiver {
    receiver: broadcast::Receiver<OrchestrationEvent>,
    workflow_id: WorkflowId,
}

impl WorkflowEventReceiver {
    /// Next event of this workflow; events of other workflows are skipped
    pub async fn recv(&mut self) -> Result<OrchestrationEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.workflow_id == self.workflow_id {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::OrchestrationEventType;
    use chrono::Utc;

    fn event(workflow_id: WorkflowId, sequence: u64, event_type: OrchestrationEventType) -> OrchestrationEvent {
        OrchestrationEvent {
            workflow_id,
            sequence,
            round_index: 0,
            event_type,
            timestamp: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();
        let id = WorkflowId::new();

        bus.publish(&event(id, 0, OrchestrationEventType::PlanCreated));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.workflow_id, id);
        assert_eq!(received.event_type, OrchestrationEventType::PlanCreated);
    }

    #[tokio::test]
    async fn test_workflow_event_filtering() {
        let bus = EventBus::new(10);
        let ours = WorkflowId::new();
        let other = WorkflowId::new();
        let mut receiver = bus.subscribe_workflow(ours);

        bus.publish(&event(other, 0, OrchestrationEventType::PlanCreated));
        bus.publish(&event(ours, 0, OrchestrationEventType::ParticipantSelected));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.workflow_id, ours);
        assert_eq!(received.event_type, OrchestrationEventType::ParticipantSelected);
    }

    #[tokio::test]
    async fn test_lagged_receiver() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();
        let id = WorkflowId::new();
        for seq in 0..5 {
            bus.publish(&event(id, seq, OrchestrationEventType::RoundEvaluated));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(3))));
        assert_eq!(receiver.try_recv().unwrap().sequence, 3);
    }

    #[test]
    fn test_subscriber_count() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        let _a = bus.subscribe();
        let _b = bus.subscribe_workflow(WorkflowId::new());
        assert_eq!(bus.subscriber_count(), 2);
    }
}
