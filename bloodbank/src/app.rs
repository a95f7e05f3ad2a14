//! The engine's public surface.
//!
//! [`BloodBank`] wires the inventory store, donor directory, allocation
//! engine, request lifecycle and expiry sweeper together and exposes the
//! operations an API layer calls.

use crate::allocation::AllocationEngine;
use crate::compatibility::{self, Compatibility};
use crate::config::PagingConfig;
use crate::donors::{DonorDirectory, DonorEligibility};
use crate::error::{BloodBankError, Result};
use crate::inventory::{InventoryStore, UnitQuery};
use crate::metrics;
use crate::notification::{LowStockThresholds, Notification, Notifier};
use crate::request_lifecycle::{
    BloodRequest, NewRequest, ProductionRequestEnvironment, RequestCommand, RequestLifecycleStore,
    RequestStatus,
};
use crate::sweeper::ExpirySweeper;
use crate::types::{
    Actor, BloodType, ComponentType, DonorId, InventoryUnit, Page, PageRequest, RequestId,
    TestPanel, UnitId, UnitStatus,
};
use bloodbank_core::environment::Clock;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A collected unit to enter into inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUnit {
    /// Donor of record
    pub donor_id: DonorId,
    /// Declared type; must match the donor's
    pub blood_type: BloodType,
    /// Component (defaults to whole blood)
    pub component: ComponentType,
    /// Lot size (defaults to 1)
    pub units: u32,
    /// Collection time
    pub collection_date: DateTime<Utc>,
    /// Screening results, if already known
    pub test_results: Option<TestPanel>,
    /// Fridge / shelf reference
    pub storage_location: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
}

impl NewUnit {
    /// One unit of whole blood, screening pending.
    #[must_use]
    pub const fn new(donor_id: DonorId, blood_type: BloodType, collection_date: DateTime<Utc>) -> Self {
        Self {
            donor_id,
            blood_type,
            component: ComponentType::WholeBlood,
            units: 1,
            collection_date,
            test_results: None,
            storage_location: None,
            notes: None,
        }
    }

    /// Set the component
    #[must_use]
    pub fn component(mut self, component: ComponentType) -> Self {
        self.component = component;
        self
    }

    /// Set the lot size
    #[must_use]
    pub fn units(mut self, units: u32) -> Self {
        self.units = units;
        self
    }

    /// Attach screening results
    #[must_use]
    pub fn test_results(mut self, panel: TestPanel) -> Self {
        self.test_results = Some(panel);
        self
    }

    /// Set the storage location
    #[must_use]
    pub fn storage_location(mut self, location: impl Into<String>) -> Self {
        self.storage_location = Some(location.into());
        self
    }

    /// Set notes
    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Filters for [`BloodBank::list_inventory`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryFilter {
    /// Exact blood type
    pub blood_type: Option<BloodType>,
    /// Exact status
    pub status: Option<UnitStatus>,
    /// Only units that expire within this many days from now
    pub expiring_within_days: Option<u32>,
}

/// Eligible lots of one donor type, for [`BloodBank::compatible_stock`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibleLots {
    /// Donor type
    pub blood_type: BloodType,
    /// Units across `lots`
    pub units: u32,
    /// Eligible lots, FEFO ordered
    pub lots: Vec<InventoryUnit>,
}

/// Tunables for [`BloodBank`].
#[derive(Clone, Debug, Default)]
pub struct BloodBankOptions {
    /// Per-type minimum stock
    pub thresholds: LowStockThresholds,
    /// Inventory page sizes
    pub paging: PagingConfig,
}

/// Blood inventory and request engine.
pub struct BloodBank<S, D> {
    inventory: Arc<S>,
    donors: Arc<D>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    requests: RequestLifecycleStore<S>,
    sweeper: Arc<ExpirySweeper<S>>,
    paging: PagingConfig,
}

impl<S: InventoryStore, D: DonorDirectory> BloodBank<S, D> {
    /// Wire an engine over the given collaborators.
    #[must_use]
    pub fn new(
        inventory: Arc<S>,
        donors: Arc<D>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        options: BloodBankOptions,
    ) -> Self {
        let requests = RequestLifecycleStore::new(
            AllocationEngine::new(Arc::clone(&inventory)),
            ProductionRequestEnvironment::new(Arc::clone(&clock), Arc::clone(&notifier)),
            options.thresholds.clone(),
        );
        let sweeper = Arc::new(ExpirySweeper::new(
            Arc::clone(&inventory),
            Arc::clone(&clock),
            options.thresholds,
            Arc::clone(&notifier),
        ));

        Self {
            inventory,
            donors,
            clock,
            notifier,
            requests,
            sweeper,
            paging: options.paging,
        }
    }

    // ========================================================================
    // Inventory
    // ========================================================================

    /// Enter a collected unit into inventory.
    ///
    /// The declared type is checked against the donor of record before
    /// anything is written; the expiry date follows from the component's
    /// shelf life.
    ///
    /// # Errors
    ///
    /// - [`BloodBankError::Validation`] for a zero lot size, a future
    ///   collection date or a deferred donor
    /// - [`BloodBankError::NotFound`] if the donor is unknown
    /// - [`BloodBankError::Integrity`] if the declared type disagrees with
    ///   the donor's recorded type
    pub async fn add_unit(&self, unit: NewUnit, actor: Actor) -> Result<InventoryUnit> {
        let now = self.clock.now();
        if unit.units == 0 {
            return Err(BloodBankError::Validation(
                "lot size must be at least 1 unit".to_string(),
            ));
        }
        if unit.collection_date > now {
            return Err(BloodBankError::Validation(format!(
                "collection date {} is in the future",
                unit.collection_date
            )));
        }

        let donor = self.donors.donor(unit.donor_id).await?;
        if donor.blood_type != unit.blood_type {
            return Err(BloodBankError::Integrity(format!(
                "declared {} but donor {} is on record as {}",
                unit.blood_type, donor.id, donor.blood_type
            )));
        }
        if donor.eligibility != DonorEligibility::Eligible {
            return Err(BloodBankError::Validation(format!(
                "donor {} is deferred ({:?})",
                donor.id, donor.eligibility
            )));
        }

        let record = InventoryUnit {
            id: UnitId::new(),
            blood_type: unit.blood_type,
            component: unit.component,
            units: unit.units,
            collection_date: unit.collection_date,
            expiry_date: unit.component.expiry_for(unit.collection_date),
            donor_id: unit.donor_id,
            status: UnitStatus::Available,
            test_results: unit.test_results.unwrap_or_default(),
            storage_location: unit.storage_location,
            notes: unit.notes,
            reserved_for: None,
            used_for: None,
            updated_by: actor,
            updated_at: now,
        };
        let record = self.inventory.insert(record).await?;

        metrics::record_units_added(record.blood_type, record.units);
        tracing::info!(
            unit_id = %record.id,
            blood_type = %record.blood_type,
            units = record.units,
            expiry_date = %record.expiry_date,
            "Unit added"
        );
        self.notify(Notification::UnitAdded {
            unit_id: record.id,
            blood_type: record.blood_type,
            units: record.units,
            expiry_date: record.expiry_date,
        })
        .await;

        Ok(record)
    }

    /// Fetch one unit.
    ///
    /// # Errors
    ///
    /// [`BloodBankError::NotFound`] if the unit is unknown.
    pub async fn get_unit(&self, id: UnitId) -> Result<InventoryUnit> {
        self.inventory.get(id).await
    }

    /// Page through inventory, soonest expiry first.
    ///
    /// A `per_page` of 0 uses the configured default; larger pages are capped
    /// at the configured maximum.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_inventory(
        &self,
        filter: InventoryFilter,
        page: PageRequest,
    ) -> Result<Page<InventoryUnit>> {
        let now = self.clock.now();
        let mut query = UnitQuery::new();
        query.blood_type = filter.blood_type;
        query.status = filter.status;
        if let Some(days) = filter.expiring_within_days {
            query = query
                .not_expired_at(now)
                .expires_before(now + Duration::days(i64::from(days)));
        }

        let units = self.inventory.query(query).await?;
        let page = PageRequest::new(page.page, self.paging.page_size(page.per_page));
        Ok(Page::from_vec(units, page))
    }

    /// Replace a unit's screening results.
    ///
    /// # Errors
    ///
    /// - [`BloodBankError::NotFound`] if the unit is unknown
    /// - [`BloodBankError::Conflict`] if the unit is used or expired
    pub async fn update_test_results(
        &self,
        id: UnitId,
        panel: TestPanel,
        actor: Actor,
    ) -> Result<InventoryUnit> {
        let now = self.clock.now();
        let unit = self.inventory.get(id).await?;
        let before = self.stock_level(unit.blood_type).await?;

        let updated = self
            .inventory
            .update_test_results(id, panel, actor, now)
            .await?;
        if updated.test_results.has_positive() {
            tracing::warn!(unit_id = %id, status = %updated.status, "Unit screened reactive");
        }

        self.requests.check_low_stock(updated.blood_type, before).await;
        Ok(updated)
    }

    /// Hard-delete an available or expired unit.
    ///
    /// # Errors
    ///
    /// - [`BloodBankError::NotFound`] if the unit is unknown
    /// - [`BloodBankError::Conflict`] if the unit is reserved or used
    pub async fn delete_unit(&self, id: UnitId) -> Result<InventoryUnit> {
        let unit = self.inventory.get(id).await?;
        let before = self.stock_level(unit.blood_type).await?;

        let deleted = self.inventory.delete(id).await?;
        tracing::info!(unit_id = %id, status = %deleted.status, "Unit deleted");

        self.requests.check_low_stock(deleted.blood_type, before).await;
        Ok(deleted)
    }

    /// Allocatable units of `blood_type` on the shelf now.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn stock_level(&self, blood_type: BloodType) -> Result<u32> {
        let available = self
            .requests
            .engine()
            .available_units(blood_type, self.clock.now())
            .await?;
        metrics::update_stock_available(blood_type, available);
        Ok(available)
    }

    /// Eligible lots a recipient of `recipient` could receive, grouped by
    /// donor type with the exact type first. Reserves nothing.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn compatible_stock(&self, recipient: BloodType) -> Result<Vec<CompatibleLots>> {
        let now = self.clock.now();
        let engine = self.requests.engine();

        let mut groups = Vec::new();
        for donor_type in compatibility::can_receive_from(recipient) {
            let lots = engine.eligible_lots(donor_type, now).await?;
            if lots.is_empty() {
                continue;
            }
            let units = lots
                .iter()
                .fold(0u32, |sum, lot| sum.saturating_add(lot.units));
            groups.push(CompatibleLots {
                blood_type: donor_type,
                units,
                lots,
            });
        }
        Ok(groups)
    }

    /// ABO/Rh compatibility sets for `blood_type`.
    #[must_use]
    pub fn compatibility(&self, blood_type: BloodType) -> Compatibility {
        compatibility::lookup(blood_type)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Submit a request; low-urgency requests may be auto-approved.
    ///
    /// # Errors
    ///
    /// See [`RequestLifecycleStore::create`].
    pub async fn create_request(&self, request: NewRequest) -> Result<BloodRequest> {
        self.requests.create(request).await
    }

    /// Approve, reject, fulfil or cancel a request.
    ///
    /// # Errors
    ///
    /// See [`RequestLifecycleStore::transition`].
    pub async fn transition_request(
        &self,
        request_id: RequestId,
        command: RequestCommand,
        actor: Actor,
    ) -> Result<BloodRequest> {
        self.requests.transition(request_id, command, actor).await
    }

    /// Look up a request.
    ///
    /// # Errors
    ///
    /// [`BloodBankError::NotFound`] if the request is unknown.
    pub async fn get_request(&self, request_id: RequestId) -> Result<BloodRequest> {
        self.requests.get(request_id).await
    }

    /// Requests filtered by status and type, oldest first.
    pub async fn list_requests(
        &self,
        status: Option<RequestStatus>,
        blood_type: Option<BloodType>,
    ) -> Vec<BloodRequest> {
        self.requests.list(status, blood_type).await
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    /// Expire stale available units; returns how many were transitioned.
    ///
    /// Types pushed below their minimum by the expiry are reported through
    /// the notifier.
    ///
    /// # Errors
    ///
    /// [`BloodBankError::Storage`] if the store fails.
    pub async fn sweep_expired(&self) -> Result<usize> {
        Ok(self.sweeper.sweep().await?.expired.len())
    }

    /// The sweeper, for spawning on an interval.
    #[must_use]
    pub fn sweeper(&self) -> Arc<ExpirySweeper<S>> {
        Arc::clone(&self.sweeper)
    }

    async fn notify(&self, notification: Notification) {
        let event = notification.event();
        if let Err(error) = self.notifier.notify(notification).await {
            tracing::warn!(event, %error, "Notification not delivered");
        }
    }
}
