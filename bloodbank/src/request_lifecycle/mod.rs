//! Blood request lifecycle.
//!
//! ```text
//! pending             → approved | rejected | cancelled
//! approved            → fulfilled | partially_fulfilled | cancelled
//! partially_fulfilled → fulfilled | cancelled
//! fulfilled, rejected, cancelled: terminal
//! ```
//!
//! [`RequestReducer`] is the pure state machine: it validates each transition
//! against the table on [`RequestStatus`], updates the ledger and describes
//! the notifications to send. [`RequestLifecycleStore`] does the inventory
//! work (reserve on approval, release on cancel, consume on fulfilment) and
//! dispatches the outcome to the reducer, so a request is never observed in a
//! state its lots do not back.

pub mod actions;
pub mod environment;
pub mod reducer;
pub mod store;
#[cfg(test)]
mod tests;
pub mod types;

pub use actions::RequestAction;
pub use environment::{ProductionRequestEnvironment, RequestEnvironment};
pub use reducer::RequestReducer;
pub use store::RequestLifecycleStore;
pub use types::{
    BloodRequest, NewRequest, RequestCommand, RequestLedger, RequestStatus, Urgency,
};
