//! Blood Bank - inventory lifecycle and request allocation engine
//!
//! Tracks blood units from collection to disposition and matches hospital
//! requests against available stock.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────┐
//!   request  ───▶ │   RequestLifecycle   │  pending → approved → fulfilled
//!                 └──────────┬───────────┘
//!                            │ reserve / release / consume
//!                            ▼
//!                 ┌──────────────────────┐
//!                 │   AllocationEngine   │  exact type, FEFO, lot by lot
//!                 └──────────┬───────────┘
//!                            │ conditional writes
//!                            ▼
//!                 ┌──────────────────────┐        ┌──────────────────┐
//!                 │    InventoryStore    │ ◀───── │  ExpirySweeper   │
//!                 └──────────────────────┘        └──────────────────┘
//! ```
//!
//! # Key Features
//!
//! ## 1. No double reservation
//!
//! The inventory store exposes only conditional status writes: a unit moves
//! `available → reserved` only if it is still available at write time. Two
//! allocations (or an allocation and a sweep) racing on the same unit resolve
//! with one winner; the loser skips the unit and tries the next.
//!
//! ## 2. First-expire-first-out
//!
//! Eligible stock is exact-type, fully screened negative and unexpired,
//! ordered by expiry date. Compatibility substitution is advisory only
//! ([`compatibility`], [`BloodBank::compatible_stock`]).
//!
//! ## 3. Typed failures
//!
//! Every operation returns a [`BloodBankError`] with a stable [`ErrorKind`];
//! a stock shortfall carries the units that could be gathered so the caller
//! can accept a partial allocation or reject.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocation;
pub mod app;
pub mod compatibility;
pub mod config;
pub mod donors;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod mocks;
pub mod notification;
pub mod request_lifecycle;
pub mod sweeper;
pub mod types;

pub use allocation::{AllocatedLot, Allocation, AllocationEngine, ShortfallPolicy};
pub use app::{BloodBank, BloodBankOptions, CompatibleLots, InventoryFilter, NewUnit};
pub use config::Config;
pub use error::{BloodBankError, ErrorKind, Result};
pub use inventory::{InMemoryInventoryStore, InventoryStore, UnitQuery};
pub use notification::{LowStockThresholds, Notification, Notifier, TracingNotifier};
pub use request_lifecycle::{
    BloodRequest, NewRequest, RequestCommand, RequestLifecycleStore, RequestStatus, Urgency,
};
pub use sweeper::{ExpirySweeper, SweepReport};
pub use types::{
    Actor, BloodType, ComponentType, DonorId, HospitalId, InventoryUnit, MarkerResult, Page,
    PageRequest, PatientId, RequestId, TestPanel, UnitId, UnitStatus, UserId,
};
