//! Event types for two-phase commit flows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Position of the event within its flow, if stamped by an emitter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence: None,
            event,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A two-phase flow was started
    #[serde(rename = "flow.started")]
    FlowStarted {
        flow_id: Uuid,
        first_kind: String,
        second_kind: String,
    },

    /// The flow moved to a new phase
    #[serde(rename = "flow.phase_changed")]
    PhaseChanged {
        flow_id: Uuid,
        from_phase: String,
        to_phase: String,
    },

    /// The ledger accepted an operation and assigned it an id
    #[serde(rename = "operation.submitted")]
    OperationSubmitted {
        flow_id: Uuid,
        operation_id: String,
        kind: String,
    },

    /// An outcome was observed (pushed, polled or acknowledged)
    #[serde(rename = "operation.outcome")]
    OutcomeObserved {
        flow_id: Uuid,
        operation_id: String,
        outcome: String,
        source: OutcomeSource,
        /// Whether the id matched the operation the flow was waiting for
        matched: bool,
    },

    /// Automatic confirmation timed out; the caller may check manually
    #[serde(rename = "flow.manual_check_offered")]
    ManualCheckOffered { flow_id: Uuid, operation_id: String },

    /// The flow reached a terminal phase
    #[serde(rename = "flow.completed")]
    FlowCompleted {
        flow_id: Uuid,
        success: bool,
        error_kind: Option<String>,
        message: Option<String>,
    },
}

/// Where an observed outcome came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(ts_rs::TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSource {
    Push,
    TimeoutPoll,
    ManualPoll,
    Acknowledged,
}

impl Event {
    /// Get the flow ID associated with this event
    pub fn flow_id(&self) -> Uuid {
        match self {
            Event::FlowStarted { flow_id, .. } => *flow_id,
            Event::PhaseChanged { flow_id, .. } => *flow_id,
            Event::OperationSubmitted { flow_id, .. } => *flow_id,
            Event::OutcomeObserved { flow_id, .. } => *flow_id,
            Event::ManualCheckOffered { flow_id, .. } => *flow_id,
            Event::FlowCompleted { flow_id, .. } => *flow_id,
        }
    }
}
