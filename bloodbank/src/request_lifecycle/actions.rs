//! Actions for the request lifecycle reducer.
//!
//! Actions carry the outcome of any inventory work already done by the store
//! (reserved lots, topped-up lots); the reducer itself never touches
//! inventory.

use crate::allocation::AllocatedLot;
use crate::request_lifecycle::types::NewRequest;
use crate::types::{Actor, RequestId};

/// Actions for the request lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestAction {
    /// A new request was submitted
    Submit {
        /// Identifier assigned by the store
        request_id: RequestId,
        /// Validated input
        request: NewRequest,
        /// Low urgency with enough stock on the shelf at submission
        auto_approve: bool,
    },

    /// Lots were reserved; approve the request
    Approve {
        /// Request
        request_id: RequestId,
        /// Approving actor
        actor: Actor,
        /// Lots reserved for it
        lots: Vec<AllocatedLot>,
    },

    /// Decline a pending request
    Reject {
        /// Request
        request_id: RequestId,
        /// Rejecting actor
        actor: Actor,
        /// Why
        reason: String,
    },

    /// Withdraw a request
    Cancel {
        /// Request
        request_id: RequestId,
        /// Cancelling actor
        actor: Actor,
    },

    /// Reserved lots were consumed
    Fulfill {
        /// Request
        request_id: RequestId,
        /// Issuing actor
        actor: Actor,
        /// Lots allocated at fulfilment on top of those already held
        additional_lots: Vec<AllocatedLot>,
    },

    /// The notifier refused a notification (fed back from an effect)
    NotificationFailed {
        /// Event name
        event: &'static str,
        /// Dispatcher error
        reason: String,
    },
}

impl RequestAction {
    /// The request this action targets, if any.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Submit { request_id, .. }
            | Self::Approve { request_id, .. }
            | Self::Reject { request_id, .. }
            | Self::Cancel { request_id, .. }
            | Self::Fulfill { request_id, .. } => Some(*request_id),
            Self::NotificationFailed { .. } => None,
        }
    }
}
