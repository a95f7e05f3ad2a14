//! In-memory inventory ledger.

use super::store::{fefo_order, InventoryStore, UnitQuery};
use crate::error::{BloodBankError, Result};
use crate::types::{Actor, InventoryUnit, TestPanel, UnitId, UnitStatus, UnitTransition};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Inventory store backed by a `HashMap` behind a mutex.
///
/// Each operation holds the lock for a single read-check-write, which is what
/// makes [`InventoryStore::transition`] an atomic conditional write. No lock
/// is held across operations, so multi-lot allocations interleave freely.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    units: Arc<Mutex<HashMap<UnitId, InventoryUnit>>>,
}

impl InMemoryInventoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored units, regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`BloodBankError::Storage`] if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.units.lock().map_err(|_| BloodBankError::poisoned())?.len())
    }

    /// Whether the store holds no units.
    ///
    /// # Errors
    ///
    /// Returns [`BloodBankError::Storage`] if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn insert(&self, unit: InventoryUnit) -> impl Future<Output = Result<InventoryUnit>> + Send {
        let units = Arc::clone(&self.units);

        async move {
            let mut guard = units.lock().map_err(|_| BloodBankError::poisoned())?;
            if let Some(existing) = guard.get(&unit.id) {
                return Err(BloodBankError::conflict(
                    "unit",
                    unit.id,
                    existing.status,
                    "unit id already exists",
                ));
            }
            guard.insert(unit.id, unit.clone());
            Ok(unit)
        }
    }

    fn get(&self, id: UnitId) -> impl Future<Output = Result<InventoryUnit>> + Send {
        let units = Arc::clone(&self.units);

        async move {
            units
                .lock()
                .map_err(|_| BloodBankError::poisoned())?
                .get(&id)
                .cloned()
                .ok_or_else(|| BloodBankError::not_found("unit", id))
        }
    }

    fn transition(
        &self,
        id: UnitId,
        transition: UnitTransition,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<InventoryUnit>> + Send {
        let units = Arc::clone(&self.units);

        async move {
            let mut guard = units.lock().map_err(|_| BloodBankError::poisoned())?;
            let unit = guard
                .get_mut(&id)
                .ok_or_else(|| BloodBankError::not_found("unit", id))?;

            let expected = transition.expected();
            if unit.status != expected {
                return Err(BloodBankError::conflict(
                    "unit",
                    id,
                    unit.status,
                    format!("expected {expected} for transition to {}", transition.target()),
                ));
            }

            if let UnitTransition::Release(request_id) | UnitTransition::Consume(request_id) =
                transition
            {
                if unit.reserved_for != Some(request_id) {
                    return Err(BloodBankError::conflict(
                        "unit",
                        id,
                        unit.status,
                        format!("unit is not reserved for request {request_id}"),
                    ));
                }
            }

            unit.apply(transition, actor, at);
            Ok(unit.clone())
        }
    }

    fn query(&self, query: UnitQuery) -> impl Future<Output = Result<Vec<InventoryUnit>>> + Send {
        let units = Arc::clone(&self.units);

        async move {
            let mut matched: Vec<InventoryUnit> = units
                .lock()
                .map_err(|_| BloodBankError::poisoned())?
                .values()
                .filter(|unit| query.matches(unit))
                .cloned()
                .collect();
            matched.sort_by(fefo_order);
            Ok(matched)
        }
    }

    fn update_test_results(
        &self,
        id: UnitId,
        panel: TestPanel,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<InventoryUnit>> + Send {
        let units = Arc::clone(&self.units);

        async move {
            let mut guard = units.lock().map_err(|_| BloodBankError::poisoned())?;
            let unit = guard
                .get_mut(&id)
                .ok_or_else(|| BloodBankError::not_found("unit", id))?;

            if unit.status.is_terminal() {
                return Err(BloodBankError::conflict(
                    "unit",
                    id,
                    unit.status,
                    "test results cannot change after disposition",
                ));
            }

            unit.test_results = panel;
            unit.updated_by = actor;
            unit.updated_at = at;
            Ok(unit.clone())
        }
    }

    fn delete(&self, id: UnitId) -> impl Future<Output = Result<InventoryUnit>> + Send {
        let units = Arc::clone(&self.units);

        async move {
            let mut guard = units.lock().map_err(|_| BloodBankError::poisoned())?;
            let status = guard
                .get(&id)
                .map(|unit| unit.status)
                .ok_or_else(|| BloodBankError::not_found("unit", id))?;

            if matches!(status, UnitStatus::Reserved | UnitStatus::Used) {
                return Err(BloodBankError::conflict(
                    "unit",
                    id,
                    status,
                    "reserved or used units cannot be deleted",
                ));
            }

            guard
                .remove(&id)
                .ok_or_else(|| BloodBankError::not_found("unit", id))
        }
    }
}
