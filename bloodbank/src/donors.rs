//! Donor records consumed when a collected unit is added.
//!
//! Donor management is an external concern; the engine only needs to read a
//! donor's recorded blood type and eligibility.

use crate::error::{BloodBankError, Result};
use crate::types::{BloodType, DonorId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Donor eligibility as recorded by the donor registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonorEligibility {
    /// May donate
    Eligible,
    /// Deferred for a period (recent donation, travel, medication, ...)
    TemporarilyDeferred,
    /// Never again
    PermanentlyDeferred,
}

/// The slice of a donor record the engine reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonorRecord {
    /// Donor identifier
    pub id: DonorId,
    /// Blood type on file
    pub blood_type: BloodType,
    /// Current eligibility
    pub eligibility: DonorEligibility,
}

/// Read access to donor records.
pub trait DonorDirectory: Send + Sync + 'static {
    /// Look up a donor.
    ///
    /// # Errors
    ///
    /// [`BloodBankError::NotFound`] if the donor is unknown.
    fn donor(&self, id: DonorId) -> impl Future<Output = Result<DonorRecord>> + Send;
}

/// Donor directory held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDonorDirectory {
    donors: Arc<RwLock<HashMap<DonorId, DonorRecord>>>,
}

impl InMemoryDonorDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a donor record.
    ///
    /// # Errors
    ///
    /// Returns [`BloodBankError::Storage`] if the lock is poisoned.
    pub fn register(&self, record: DonorRecord) -> Result<()> {
        self.donors
            .write()
            .map_err(|_| BloodBankError::poisoned())?
            .insert(record.id, record);
        Ok(())
    }

    /// Register an eligible donor of `blood_type` and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`BloodBankError::Storage`] if the lock is poisoned.
    pub fn register_eligible(&self, blood_type: BloodType) -> Result<DonorId> {
        let id = DonorId::new();
        self.register(DonorRecord {
            id,
            blood_type,
            eligibility: DonorEligibility::Eligible,
        })?;
        Ok(id)
    }
}

impl DonorDirectory for InMemoryDonorDirectory {
    fn donor(&self, id: DonorId) -> impl Future<Output = Result<DonorRecord>> + Send {
        let donors = Arc::clone(&self.donors);

        async move {
            donors
                .read()
                .map_err(|_| BloodBankError::poisoned())?
                .get(&id)
                .cloned()
                .ok_or_else(|| BloodBankError::not_found("donor", id))
        }
    }
}
