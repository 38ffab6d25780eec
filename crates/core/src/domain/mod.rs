mod failure;
mod operation;
mod outcome;
mod phase;

pub use failure::{ErrorKind, ErrorRecord};
pub use operation::{OperationDescriptor, OperationHandle, OperationId, OperationRequest};
pub use outcome::Outcome;
pub use phase::Phase;
