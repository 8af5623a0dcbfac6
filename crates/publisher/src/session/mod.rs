//! Publisher session: controller, transport session and producer leases.
//!
//! Ownership is strictly layered. The [`SessionController`] owns the
//! [`TransportSession`], which owns every [`ProducerLease`]; nothing else holds
//! mutable media references.

mod controller;
mod inflight;
mod lease;
mod state;
mod transport;

pub use controller::SessionController;
pub use inflight::{InflightGuard, InflightRegistry, Operation, OperationKey};
pub use lease::ProducerLease;
pub use state::{LeaseEvent, LeaseState, LeaseSummary, SessionSnapshot, SessionState};
pub use transport::{CloseReason, LeaseFilter, LeaseTicket, ReleaseOutcome, TransportSession};
