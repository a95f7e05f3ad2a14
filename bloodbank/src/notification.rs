//! Outbound notifications.
//!
//! The engine decides *when* something is worth telling the outside world
//! (a unit was added, a request changed state, stock for a type fell below
//! its minimum). Delivery over SMS, email or dashboards belongs to whatever
//! implements [`Notifier`].

use crate::types::{BloodType, HospitalId, RequestId, UnitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A notification and its payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A collected unit entered inventory
    UnitAdded {
        /// New unit
        unit_id: UnitId,
        /// Its blood type
        blood_type: BloodType,
        /// Lot size
        units: u32,
        /// When it expires
        expiry_date: DateTime<Utc>,
    },
    /// A request was approved (by an operator or automatically)
    RequestApproved {
        /// Request
        request_id: RequestId,
        /// Requesting hospital
        hospital_id: HospitalId,
        /// Requested type
        blood_type: BloodType,
        /// Units requested
        units_required: u32,
        /// Units credited by reservations so far
        units_allocated: u32,
        /// Approved by the low-urgency rule at creation
        auto_approved: bool,
    },
    /// A request was rejected
    RequestRejected {
        /// Request
        request_id: RequestId,
        /// Requesting hospital
        hospital_id: HospitalId,
        /// Operator-supplied reason
        reason: String,
    },
    /// A request was fully issued
    RequestFulfilled {
        /// Request
        request_id: RequestId,
        /// Requesting hospital
        hospital_id: HospitalId,
        /// Units issued
        units: u32,
    },
    /// A request was issued short
    RequestPartiallyFulfilled {
        /// Request
        request_id: RequestId,
        /// Requesting hospital
        hospital_id: HospitalId,
        /// Units issued
        units_fulfilled: u32,
        /// Units requested
        units_required: u32,
    },
    /// Allocatable stock for a type dropped below its minimum
    LowStock {
        /// Affected type
        blood_type: BloodType,
        /// Allocatable units now on the shelf
        available: u32,
        /// Configured minimum
        threshold: u32,
    },
}

impl Notification {
    /// Stable event name, e.g. `"request_approved"`.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::UnitAdded { .. } => "unit_added",
            Self::RequestApproved { .. } => "request_approved",
            Self::RequestRejected { .. } => "request_rejected",
            Self::RequestFulfilled { .. } => "request_fulfilled",
            Self::RequestPartiallyFulfilled { .. } => "request_partially_fulfilled",
            Self::LowStock { .. } => "low_stock",
        }
    }

    /// JSON payload (including the `event` tag).
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Notification delivery failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The dispatcher refused or dropped the notification.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// External notification dispatcher.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be shared as
/// `Arc<dyn Notifier>`.
pub trait Notifier: Send + Sync {
    /// Hand a notification to the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the dispatcher cannot accept it. The engine
    /// logs and drops such failures; they never roll back a state change.
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

/// Writes every notification to the log.
///
/// The default dispatcher when no transport is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                event = notification.event(),
                payload = %notification.payload(),
                "Notification dispatched"
            );
            Ok(())
        })
    }
}

/// Per-type minimum allocatable stock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockThresholds {
    minimums: HashMap<BloodType, u32>,
}

impl Default for LowStockThresholds {
    fn default() -> Self {
        let minimums = [
            (BloodType::ONegative, 10),
            (BloodType::OPositive, 20),
            (BloodType::APositive, 15),
            (BloodType::ANegative, 8),
            (BloodType::BPositive, 10),
            (BloodType::BNegative, 5),
            (BloodType::AbPositive, 5),
            (BloodType::AbNegative, 3),
        ]
        .into_iter()
        .collect();
        Self { minimums }
    }
}

impl LowStockThresholds {
    /// Override the minimum for one type.
    #[must_use]
    pub fn with(mut self, blood_type: BloodType, minimum: u32) -> Self {
        self.minimums.insert(blood_type, minimum);
        self
    }

    /// Minimum for `blood_type` (0 if none configured).
    #[must_use]
    pub fn threshold(&self, blood_type: BloodType) -> u32 {
        self.minimums.get(&blood_type).copied().unwrap_or(0)
    }

    /// A low-stock notification if stock went from at-or-above the minimum
    /// to below it.
    #[must_use]
    pub fn check(&self, blood_type: BloodType, before: u32, after: u32) -> Option<Notification> {
        let threshold = self.threshold(blood_type);
        (before >= threshold && after < threshold).then_some(Notification::LowStock {
            blood_type,
            available: after,
            threshold,
        })
    }
}
