pub mod config;
pub mod controller;
pub mod core;
pub mod error;
pub mod flow_runner;
pub mod flows;
pub mod resources;
pub mod services;
pub mod state_machine;

pub use config::{ControllerConfig, DEFAULT_GUARD_TIMEOUT, DEFAULT_POLL_TIMEOUT};
pub use controller::{FlowCommands, FlowControl, FlowHandle, TwoPhaseCommitController};
pub use core::{FlowCallbacks, FlowEventEmitter, FlowObserver, NoopObserver};
pub use error::{OrchestratorError, Result};
pub use flow_runner::FlowReport;
pub use flows::{CommitFlow, GuaranteeDepositFlow, PaymentFlow};
pub use resources::{CancelToken, GuardState, TimeoutGuard};
pub use services::{ErrorClassifier, OutcomePoller};
pub use state_machine::{PhaseTracker, Transition};
