//! Broadcast bus shared by every flow of a process.
//!
//! Whole-bus subscribers see every envelope; [`FlowSubscription`] narrows the
//! feed to one flow and survives lag by skipping ahead.

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use uuid::Uuid;

use crate::types::EventEnvelope;

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns the number of subscribers that received the envelope.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Every envelope published from now on, for all flows.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Envelopes of a single flow, published from now on.
    ///
    /// Subscribe before starting the flow to see its `flow.started` event.
    pub fn subscribe_flow(&self, flow_id: Uuid) -> FlowSubscription {
        FlowSubscription {
            flow_id,
            rx: self.sender.subscribe(),
            missed: 0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver filtered to one flow.
pub struct FlowSubscription {
    flow_id: Uuid,
    rx: broadcast::Receiver<EventEnvelope>,
    missed: u64,
}

impl FlowSubscription {
    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Next envelope for this flow, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) if envelope.event.flow_id() == self.flow_id => return Some(envelope),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => self.missed += skipped,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-buffered envelope for this flow, without waiting.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) if envelope.event.flow_id() == self.flow_id => return Some(envelope),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => self.missed += skipped,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Envelopes (of any flow) dropped because this subscriber fell behind.
    ///
    /// Sequence gaps in the received envelopes tell which of them were ours.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}
