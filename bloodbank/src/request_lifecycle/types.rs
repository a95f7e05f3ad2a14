//! Domain types for blood requests.

use crate::allocation::{credited_total, AllocatedLot};
use crate::error::{BloodBankError, Result};
use crate::types::{Actor, BloodType, HospitalId, PatientId, RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Status
// ============================================================================

/// Status of a blood request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Submitted, awaiting a decision
    Pending,
    /// Approved; lots may or may not be reserved yet
    Approved,
    /// Some units issued, remainder outstanding
    PartiallyFulfilled,
    /// All requested units issued (terminal)
    Fulfilled,
    /// Declined (terminal)
    Rejected,
    /// Withdrawn (terminal)
    Cancelled,
}

impl RequestStatus {
    /// The request transition table.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Approved | Self::Rejected | Self::Cancelled
            ) | (
                Self::Approved,
                Self::Fulfilled | Self::PartiallyFulfilled | Self::Cancelled
            ) | (Self::PartiallyFulfilled, Self::Fulfilled | Self::Cancelled)
        )
    }

    /// Fulfilled, rejected and cancelled never re-open
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fulfilled | Self::Rejected | Self::Cancelled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::PartiallyFulfilled => "partially_fulfilled",
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Clinical urgency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Routine; eligible for auto-approval
    #[default]
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

// ============================================================================
// Requests
// ============================================================================

/// A hospital's request for blood.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodRequest {
    /// Request identifier
    pub id: RequestId,
    /// Requesting hospital (opaque reference)
    pub hospital_id: HospitalId,
    /// Submitting user (opaque reference)
    pub requester_id: UserId,
    /// Intended recipient, if known
    pub recipient_id: Option<PatientId>,
    /// Exact type requested
    pub blood_type: BloodType,
    /// Units requested (at least 1)
    pub units_required: u32,
    /// Clinical urgency
    pub urgency: Urgency,
    /// When the blood is needed
    pub required_by: DateTime<Utc>,
    /// Clinical reason given by the requester
    pub reason: Option<String>,
    /// Current status
    pub status: RequestStatus,
    /// Lots held or issued, in allocation order
    pub allocated_blood: Vec<AllocatedLot>,
    /// Who last decided on the request
    pub processed_by: Option<Actor>,
    /// When the request was last decided on
    pub processed_at: Option<DateTime<Utc>>,
    /// Set when rejected
    pub rejection_reason: Option<String>,
    /// Approved by the low-urgency rule at creation, without reserving
    pub auto_approved: bool,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl BloodRequest {
    /// Units credited by `allocated_blood`.
    #[must_use]
    pub fn allocated_total(&self) -> u32 {
        credited_total(&self.allocated_blood)
    }

    /// Units still to be allocated.
    #[must_use]
    pub fn outstanding(&self) -> u32 {
        self.units_required.saturating_sub(self.allocated_total())
    }
}

/// Input for creating a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    /// Requesting hospital
    pub hospital_id: HospitalId,
    /// Submitting user
    pub requester_id: UserId,
    /// Intended recipient, if known
    pub recipient_id: Option<PatientId>,
    /// Exact type requested
    pub blood_type: BloodType,
    /// Units requested
    pub units_required: u32,
    /// Clinical urgency
    pub urgency: Urgency,
    /// When the blood is needed
    pub required_by: DateTime<Utc>,
    /// Clinical reason
    pub reason: Option<String>,
}

impl NewRequest {
    /// Check field ranges before anything is written.
    ///
    /// # Errors
    ///
    /// [`BloodBankError::Validation`] if `units_required` is zero or
    /// `required_by` is already past at `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.units_required == 0 {
            return Err(BloodBankError::Validation(
                "units required must be at least 1".to_string(),
            ));
        }
        if self.required_by < now {
            return Err(BloodBankError::Validation(format!(
                "required-by date {} is in the past",
                self.required_by
            )));
        }
        Ok(())
    }

    pub(crate) fn into_request(
        self,
        id: RequestId,
        auto_approved: bool,
        now: DateTime<Utc>,
    ) -> BloodRequest {
        let (status, processed_by, processed_at) = if auto_approved {
            (RequestStatus::Approved, Some(Actor::System), Some(now))
        } else {
            (RequestStatus::Pending, None, None)
        };

        BloodRequest {
            id,
            hospital_id: self.hospital_id,
            requester_id: self.requester_id,
            recipient_id: self.recipient_id,
            blood_type: self.blood_type,
            units_required: self.units_required,
            urgency: self.urgency,
            required_by: self.required_by,
            reason: self.reason,
            status,
            allocated_blood: Vec::new(),
            processed_by,
            processed_at,
            rejection_reason: None,
            auto_approved,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Operator command applied through
/// [`crate::request_lifecycle::RequestLifecycleStore::transition`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RequestCommand {
    /// Reserve stock and approve
    Approve {
        /// Keep whatever could be reserved instead of failing on a shortfall
        accept_partial: bool,
    },
    /// Decline with a reason
    Reject {
        /// Required, non-empty
        reason: String,
    },
    /// Issue the reserved lots
    Fulfill,
    /// Withdraw and release any reserved lots
    Cancel,
}

impl RequestCommand {
    /// Name used in logs and errors
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Fulfill => "fulfill",
            Self::Cancel => "cancel",
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Every request known to the engine, plus the last reducer failure.
#[derive(Clone, Debug, Default)]
pub struct RequestLedger {
    requests: HashMap<RequestId, BloodRequest>,
    /// Error raised by the most recent action, if it was refused
    pub last_error: Option<BloodBankError>,
    /// Notifications the dispatcher refused
    pub undelivered_notifications: u64,
}

impl RequestLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a request.
    #[must_use]
    pub fn get(&self, id: &RequestId) -> Option<&BloodRequest> {
        self.requests.get(id)
    }

    /// Look up a request mutably.
    pub fn get_mut(&mut self, id: &RequestId) -> Option<&mut BloodRequest> {
        self.requests.get_mut(id)
    }

    /// Whether a request exists.
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.requests.contains_key(id)
    }

    /// Add a request.
    pub fn insert(&mut self, request: BloodRequest) {
        self.requests.insert(request.id, request);
    }

    /// All requests, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &BloodRequest> {
        self.requests.values()
    }

    /// Number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
