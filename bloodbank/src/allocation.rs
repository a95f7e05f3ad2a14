//! Allocation engine: selects and reserves lots for a request.
//!
//! Selection is exact-type FEFO. Reservation is lot by lot through
//! [`InventoryStore::transition`]; there is no lock across the selection, so a
//! lot taken by a concurrent allocation (or expired by a sweep) between the
//! query and the write is skipped and the next eligible lot is tried. If the
//! attempt still falls short, everything it reserved is released again.

use crate::error::{BloodBankError, Result};
use crate::inventory::{InventoryStore, UnitQuery};
use crate::metrics;
use crate::types::{Actor, BloodType, InventoryUnit, RequestId, UnitId, UnitStatus, UnitTransition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What to do when eligible stock cannot cover the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Fail with [`BloodBankError::InsufficientStock`] and reserve nothing
    #[default]
    Reject,
    /// Reserve what exists (at least one lot)
    AcceptPartial,
}

/// One lot held by a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedLot {
    /// Reserved unit
    pub unit_id: UnitId,
    /// Units credited toward the request
    pub units: u32,
    /// Physical lot size; exceeds `units` when the last lot overshoots
    pub lot_units: u32,
    /// When the reservation was made
    pub allocation_date: DateTime<Utc>,
}

/// Result of a successful allocation attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Reserved lots in FEFO order
    pub lots: Vec<AllocatedLot>,
    /// Lots skipped because they changed between query and reservation
    pub skipped: usize,
}

impl Allocation {
    /// Units credited toward the request
    #[must_use]
    pub fn credited(&self) -> u32 {
        credited_total(&self.lots)
    }

    /// Physical units held, counting whole lots
    #[must_use]
    pub fn physical(&self) -> u32 {
        self.lots
            .iter()
            .fold(0u32, |sum, lot| sum.saturating_add(lot.lot_units))
    }
}

/// Sum of credited units over `lots`.
#[must_use]
pub fn credited_total(lots: &[AllocatedLot]) -> u32 {
    lots.iter().fold(0u32, |sum, lot| sum.saturating_add(lot.units))
}

/// Reserves, releases and consumes lots on behalf of requests.
#[derive(Debug)]
pub struct AllocationEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for AllocationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: InventoryStore> AllocationEngine<S> {
    /// Create an engine over `store`.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying inventory store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Lots that may be reserved for `blood_type` at `now`, FEFO ordered.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn eligible_lots(
        &self,
        blood_type: BloodType,
        now: DateTime<Utc>,
    ) -> Result<Vec<InventoryUnit>> {
        self.store
            .query(UnitQuery::allocatable(blood_type, now))
            .await
    }

    /// Allocatable units for `blood_type` at `now`.
    ///
    /// A point-in-time read; it reserves nothing.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn available_units(&self, blood_type: BloodType, now: DateTime<Utc>) -> Result<u32> {
        let lots = self.eligible_lots(blood_type, now).await?;
        Ok(lots
            .iter()
            .fold(0u32, |sum, lot| sum.saturating_add(lot.units)))
    }

    /// Reserve lots of `blood_type` for `request_id` until `units_needed` is
    /// covered.
    ///
    /// Under [`ShortfallPolicy::Reject`] the eligible total is checked first
    /// and nothing is written when it falls short. Either policy may still
    /// come up short after losing races, in which case every lot reserved by
    /// this attempt is released before returning (unless the policy accepts
    /// a partial result and at least one lot was secured).
    ///
    /// # Errors
    ///
    /// - [`BloodBankError::Validation`] if `units_needed` is zero
    /// - [`BloodBankError::InsufficientStock`] with the units that could be
    ///   gathered
    /// - [`BloodBankError::Storage`] if the store fails; reservations made so
    ///   far are released first
    pub async fn allocate(
        &self,
        request_id: RequestId,
        blood_type: BloodType,
        units_needed: u32,
        policy: ShortfallPolicy,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Allocation> {
        if units_needed == 0 {
            return Err(BloodBankError::Validation(
                "units to allocate must be at least 1".to_string(),
            ));
        }

        let eligible = self.eligible_lots(blood_type, now).await?;
        let on_shelf = eligible
            .iter()
            .fold(0u32, |sum, lot| sum.saturating_add(lot.units));

        if (policy == ShortfallPolicy::Reject && on_shelf < units_needed) || on_shelf == 0 {
            metrics::record_allocation_shortfall(blood_type);
            tracing::info!(
                %request_id,
                %blood_type,
                requested = units_needed,
                available = on_shelf,
                "Insufficient stock, nothing reserved"
            );
            return Err(BloodBankError::InsufficientStock {
                blood_type,
                requested: units_needed,
                available: on_shelf,
            });
        }

        let mut allocation = Allocation::default();
        let mut credited = 0u32;

        for lot in eligible {
            if credited >= units_needed {
                break;
            }

            let transition = UnitTransition::Reserve(request_id);
            match self.store.transition(lot.id, transition, actor, now).await {
                Ok(reserved) => {
                    metrics::record_unit_transition(transition);
                    let units = reserved.units.min(units_needed - credited);
                    credited += units;
                    tracing::debug!(
                        %request_id,
                        unit_id = %reserved.id,
                        expiry_date = %reserved.expiry_date,
                        lot_units = reserved.units,
                        credited = units,
                        "Lot reserved"
                    );
                    allocation.lots.push(AllocatedLot {
                        unit_id: reserved.id,
                        units,
                        lot_units: reserved.units,
                        allocation_date: now,
                    });
                },
                Err(error @ (BloodBankError::Conflict { .. } | BloodBankError::NotFound { .. })) => {
                    metrics::record_transition_conflict(transition);
                    tracing::warn!(%request_id, unit_id = %lot.id, %error, "Lot lost before reservation, skipping");
                    allocation.skipped += 1;
                },
                Err(error) => {
                    tracing::warn!(%request_id, %error, "Store failed mid-allocation, compensating");
                    self.compensate(request_id, &allocation.lots, actor, now).await;
                    return Err(error);
                },
            }
        }

        if credited < units_needed
            && (policy == ShortfallPolicy::Reject || allocation.lots.is_empty())
        {
            metrics::record_allocation_shortfall(blood_type);
            tracing::warn!(
                %request_id,
                %blood_type,
                requested = units_needed,
                available = credited,
                skipped = allocation.skipped,
                "Allocation fell short after lost races, releasing"
            );
            self.compensate(request_id, &allocation.lots, actor, now).await;
            return Err(BloodBankError::InsufficientStock {
                blood_type,
                requested: units_needed,
                available: credited,
            });
        }

        tracing::info!(
            %request_id,
            %blood_type,
            requested = units_needed,
            credited,
            lots = allocation.lots.len(),
            "Allocation reserved"
        );
        Ok(allocation)
    }

    /// Return `lots` held by `request_id` to the shelf.
    ///
    /// Lots that are no longer reserved for the request are skipped. Returns
    /// the number of lots released.
    ///
    /// # Errors
    ///
    /// [`BloodBankError::Storage`] if the store fails.
    pub async fn release(
        &self,
        request_id: RequestId,
        lots: &[AllocatedLot],
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut released = 0;
        for lot in lots {
            let transition = UnitTransition::Release(request_id);
            match self.store.transition(lot.unit_id, transition, actor, now).await {
                Ok(_) => {
                    metrics::record_unit_transition(transition);
                    released += 1;
                },
                Err(error @ (BloodBankError::Conflict { .. } | BloodBankError::NotFound { .. })) => {
                    metrics::record_transition_conflict(transition);
                    tracing::warn!(%request_id, unit_id = %lot.unit_id, %error, "Lot not held, nothing to release");
                },
                Err(error) => return Err(error),
            }
        }
        tracing::debug!(%request_id, released, "Lots released");
        Ok(released)
    }

    /// Mark `lots` held by `request_id` as used.
    ///
    /// Every lot is checked before any is written: each must still be
    /// reserved for the request and still screen negative. Lots already used
    /// for the request are skipped, so a fulfilment interrupted by a store
    /// failure can be retried and picks up where it stopped.
    ///
    /// # Errors
    ///
    /// - [`BloodBankError::NotFound`] if a lot no longer exists
    /// - [`BloodBankError::Conflict`] if a lot is not reserved for the request
    ///   or its screening is no longer all negative
    /// - [`BloodBankError::Storage`] if the store fails; lots written before
    ///   the failure stay used
    pub async fn consume(
        &self,
        request_id: RequestId,
        lots: &[AllocatedLot],
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut pending = Vec::with_capacity(lots.len());
        for lot in lots {
            let unit = self.store.get(lot.unit_id).await?;
            if unit.status == UnitStatus::Used && unit.used_for == Some(request_id) {
                continue;
            }
            if unit.status != UnitStatus::Reserved || unit.reserved_for != Some(request_id) {
                return Err(BloodBankError::conflict(
                    "unit",
                    unit.id,
                    unit.status,
                    format!("unit is not reserved for request {request_id}"),
                ));
            }
            if !unit.test_results.passed() {
                return Err(BloodBankError::conflict(
                    "unit",
                    unit.id,
                    unit.status,
                    "screening is no longer all negative",
                ));
            }
            pending.push(unit.id);
        }

        let transition = UnitTransition::Consume(request_id);
        for (consumed, unit_id) in pending.iter().enumerate() {
            if let Err(error) = self.store.transition(*unit_id, transition, actor, now).await {
                tracing::error!(
                    %request_id,
                    %unit_id,
                    consumed,
                    remaining = pending.len() - consumed,
                    %error,
                    "Consume interrupted"
                );
                return Err(error);
            }
            metrics::record_unit_transition(transition);
        }
        tracing::debug!(%request_id, lots = pending.len(), "Lots consumed");
        Ok(())
    }

    async fn compensate(
        &self,
        request_id: RequestId,
        lots: &[AllocatedLot],
        actor: Actor,
        now: DateTime<Utc>,
    ) {
        if lots.is_empty() {
            return;
        }
        if let Err(error) = self.release(request_id, lots, actor, now).await {
            tracing::error!(%request_id, %error, "Compensating release failed");
        }
    }
}
