//! The inventory ledger interface.

use crate::error::Result;
use crate::types::{Actor, BloodType, InventoryUnit, TestPanel, UnitId, UnitStatus, UnitTransition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Filter for [`InventoryStore::query`].
///
/// Every field is optional; an empty query matches every unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitQuery {
    /// Exact blood type
    pub blood_type: Option<BloodType>,
    /// Exact status
    pub status: Option<UnitStatus>,
    /// `Some(true)`: all four markers negative. `Some(false)`: anything else.
    pub tests_passed: Option<bool>,
    /// Only units whose expiry date is strictly after this instant
    pub not_expired_at: Option<DateTime<Utc>>,
    /// Only units whose expiry date is strictly before this instant
    pub expires_before: Option<DateTime<Utc>>,
}

impl UnitQuery {
    /// An empty query
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lots the allocation engine may reserve for `blood_type` at `now`.
    #[must_use]
    pub fn allocatable(blood_type: BloodType, now: DateTime<Utc>) -> Self {
        Self::new()
            .blood_type(blood_type)
            .status(UnitStatus::Available)
            .tests_passed(true)
            .not_expired_at(now)
    }

    /// Restrict to a blood type
    #[must_use]
    pub const fn blood_type(mut self, blood_type: BloodType) -> Self {
        self.blood_type = Some(blood_type);
        self
    }

    /// Restrict to a status
    #[must_use]
    pub const fn status(mut self, status: UnitStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Restrict by screening outcome
    #[must_use]
    pub const fn tests_passed(mut self, passed: bool) -> Self {
        self.tests_passed = Some(passed);
        self
    }

    /// Exclude units expired at `at`
    #[must_use]
    pub const fn not_expired_at(mut self, at: DateTime<Utc>) -> Self {
        self.not_expired_at = Some(at);
        self
    }

    /// Keep only units expiring before `at`
    #[must_use]
    pub const fn expires_before(mut self, at: DateTime<Utc>) -> Self {
        self.expires_before = Some(at);
        self
    }

    /// Whether `unit` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, unit: &InventoryUnit) -> bool {
        self.blood_type.is_none_or(|blood_type| unit.blood_type == blood_type)
            && self.status.is_none_or(|status| unit.status == status)
            && self
                .tests_passed
                .is_none_or(|passed| unit.test_results.passed() == passed)
            && self.not_expired_at.is_none_or(|at| unit.expiry_date > at)
            && self.expires_before.is_none_or(|at| unit.expiry_date < at)
    }
}

/// Storage for inventory units.
///
/// The store is the single shared mutable resource of the engine. It exposes
/// no unconditional status write: every status change goes through
/// [`InventoryStore::transition`], which applies only if the unit still holds
/// the status the transition expects. Allocation and expiry sweeps racing on
/// the same unit are resolved by that check alone.
///
/// Implementations must be cheap to share behind an `Arc`.
pub trait InventoryStore: Send + Sync + 'static {
    /// Insert a new unit.
    ///
    /// # Errors
    ///
    /// - [`crate::BloodBankError::Conflict`] if the id already exists
    /// - [`crate::BloodBankError::Storage`] if the backend fails
    fn insert(&self, unit: InventoryUnit) -> impl Future<Output = Result<InventoryUnit>> + Send;

    /// Fetch one unit.
    ///
    /// # Errors
    ///
    /// [`crate::BloodBankError::NotFound`] if the id is unknown.
    fn get(&self, id: UnitId) -> impl Future<Output = Result<InventoryUnit>> + Send;

    /// Atomic conditional status change.
    ///
    /// Succeeds only if the unit's current status equals
    /// [`UnitTransition::expected`] and, for release/consume, the unit is
    /// reserved for the same request. Returns the updated unit.
    ///
    /// # Errors
    ///
    /// - [`crate::BloodBankError::NotFound`] if the id is unknown
    /// - [`crate::BloodBankError::Conflict`] (with the current status) if the
    ///   precondition no longer holds
    fn transition(
        &self,
        id: UnitId,
        transition: UnitTransition,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<InventoryUnit>> + Send;

    /// Units matching `query`, ordered by ascending expiry date.
    ///
    /// Ties are broken by collection date, then id, so repeated queries over
    /// the same data return the same order.
    ///
    /// # Errors
    ///
    /// [`crate::BloodBankError::Storage`] if the backend fails.
    fn query(&self, query: UnitQuery) -> impl Future<Output = Result<Vec<InventoryUnit>>> + Send;

    /// Replace a unit's screening panel.
    ///
    /// # Errors
    ///
    /// - [`crate::BloodBankError::NotFound`] if the id is unknown
    /// - [`crate::BloodBankError::Conflict`] if the unit is used or expired
    fn update_test_results(
        &self,
        id: UnitId,
        panel: TestPanel,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<InventoryUnit>> + Send;

    /// Hard-delete a unit that is available or expired.
    ///
    /// # Errors
    ///
    /// - [`crate::BloodBankError::NotFound`] if the id is unknown
    /// - [`crate::BloodBankError::Conflict`] if the unit is reserved or used
    fn delete(&self, id: UnitId) -> impl Future<Output = Result<InventoryUnit>> + Send;
}

/// Deterministic FEFO ordering shared by store implementations.
pub(crate) fn fefo_order(a: &InventoryUnit, b: &InventoryUnit) -> std::cmp::Ordering {
    a.expiry_date
        .cmp(&b.expiry_date)
        .then_with(|| a.collection_date.cmp(&b.collection_date))
        .then_with(|| a.id.cmp(&b.id))
}
