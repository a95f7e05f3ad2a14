//! # Blood Bank Core
//!
//! Functional-core abstractions shared by the blood bank engine.
//!
//! Domain workflows that change a blood request are expressed as reducers:
//!
//! - **State**: the request ledger owned by a store
//! - **Action**: an already-decided fact (approved with these lots, rejected for
//!   this reason, ...)
//! - **Reducer**: pure `(State, Action, Environment) → (State, Effects)`, which
//!   enforces the transition table and never touches inventory directly
//! - **Effect**: a description of a side effect (a notification, a follow-up
//!   action) that the owning store executes after the state change commits
//! - **Environment**: injected dependencies such as the [`environment::Clock`]
//!
//! Inventory access lives behind store traits in the `bloodbank` crate; the
//! reducer only ever sees the outcome of an allocation, which keeps the state
//! machine deterministic and testable with a fixed clock.
//!
//! ## Example
//!
//! ```ignore
//! use bloodbank_core::{effect::Effect, reducer::Reducer, SmallVec};
//!
//! impl Reducer for RequestReducer {
//!     type State = RequestLedger;
//!     type Action = RequestAction;
//!     type Environment = RequestEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut RequestLedger,
//!         action: RequestAction,
//!         env: &RequestEnvironment,
//!     ) -> SmallVec<[Effect<RequestAction>; 4]> {
//!         // Transition table checks and state updates go here
//!         SmallVec::new()
//!     }
//! }
//! ```

pub mod effect;
pub mod environment;
pub mod reducer;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};
