//! Per-flow event emitter with sequence guarantees.
//!
//! Every event a flow publishes carries the flow's next sequence number, so
//! subscribers can restore per-flow order even when many flows share a bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use events::{Event, EventBus, EventEnvelope};
use uuid::Uuid;

/// Event emitter scoped to one flow.
///
/// Publishing is optional: without a bus the emitter still counts events,
/// which keeps call sites free of `if let Some(bus)` noise.
#[derive(Clone)]
pub struct FlowEventEmitter {
    flow_id: Uuid,
    bus: Option<EventBus>,
    sequence: Arc<AtomicU64>,
}

impl FlowEventEmitter {
    pub fn new(flow_id: Uuid, bus: Option<EventBus>) -> Self {
        Self {
            flow_id,
            bus,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event with the next sequence number.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        if let Some(ref bus) = self.bus {
            bus.publish(EventEnvelope::new(event).with_sequence(seq));
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    /// Number of events emitted so far.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}
