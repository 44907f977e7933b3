//! Timer/scheduler coordination.
//!
//! Three kinds of timer run while the system is live:
//!
//! - the host wake trigger for the next alarm start ([`WakeHost`])
//! - the deadline timer for the Active alarm ([`Coordinator`])
//! - the session countdown ([`DismissalSession`](crate::session::DismissalSession))
//!
//! All of them change state only through the lifecycle manager.

mod coordinator;
mod wake;

pub use coordinator::{Coordinator, CoordinatorStatus, PendingWake, WakeOutcome, PENDING_WAKE_KEY};
pub use wake::{TokioWakeHost, WakeHost, WakePayload};
