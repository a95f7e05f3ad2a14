//! Reducer for the request lifecycle.

use crate::allocation::credited_total;
use crate::error::{BloodBankError, Result};
use crate::notification::Notification;
use crate::request_lifecycle::environment::{ProductionRequestEnvironment, RequestEnvironment};
use crate::request_lifecycle::types::{BloodRequest, RequestLedger, RequestStatus};
use crate::request_lifecycle::RequestAction;
use crate::types::{Actor, RequestId};
use bloodbank_core::{async_effect, effect::Effect, reducer::Reducer};
use smallvec::{smallvec, SmallVec};

type Effects = SmallVec<[Effect<RequestAction>; 4]>;

/// Pure state machine over [`RequestLedger`].
///
/// Every transition is checked against [`RequestStatus::can_transition_to`].
/// A refused action leaves the ledger untouched and records the failure in
/// [`RequestLedger::last_error`]; an accepted one clears it.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestReducer;

impl RequestReducer {
    /// Create a new request reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn apply(
        state: &mut RequestLedger,
        action: RequestAction,
        env: &ProductionRequestEnvironment,
    ) -> Result<Effects> {
        let now = env.clock().now();

        match action {
            RequestAction::Submit {
                request_id,
                request,
                auto_approve,
            } => {
                if state.contains(&request_id) {
                    return Err(BloodBankError::conflict(
                        "request",
                        request_id,
                        "exists",
                        "request id already submitted",
                    ));
                }
                let request = request.into_request(request_id, auto_approve, now);
                let effects = if auto_approve {
                    smallvec![notify(env, approved(&request))]
                } else {
                    smallvec![Effect::None]
                };
                state.insert(request);
                Ok(effects)
            },

            RequestAction::Approve {
                request_id,
                actor,
                lots,
            } => {
                let request = checked(state, request_id, RequestStatus::Approved, "approve")?;
                if credited_total(&lots) > request.units_required {
                    return Err(over_allocation(request, credited_total(&lots)));
                }
                request.allocated_blood = lots;
                request.auto_approved = false;
                stamp(request, RequestStatus::Approved, actor, now);
                Ok(smallvec![notify(env, approved(request))])
            },

            RequestAction::Reject {
                request_id,
                actor,
                reason,
            } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(BloodBankError::Validation(
                        "a rejection reason is required".to_string(),
                    ));
                }
                let request = checked(state, request_id, RequestStatus::Rejected, "reject")?;
                request.rejection_reason = Some(reason.to_string());
                stamp(request, RequestStatus::Rejected, actor, now);
                Ok(smallvec![notify(
                    env,
                    Notification::RequestRejected {
                        request_id,
                        hospital_id: request.hospital_id,
                        reason: reason.to_string(),
                    }
                )])
            },

            RequestAction::Cancel { request_id, actor } => {
                let request = checked(state, request_id, RequestStatus::Cancelled, "cancel")?;
                stamp(request, RequestStatus::Cancelled, actor, now);
                Ok(smallvec![Effect::None])
            },

            RequestAction::Fulfill {
                request_id,
                actor,
                additional_lots,
            } => {
                let request = state
                    .get_mut(&request_id)
                    .ok_or_else(|| BloodBankError::not_found("request", request_id))?;

                let total = request
                    .allocated_total()
                    .saturating_add(credited_total(&additional_lots));
                if total == 0 {
                    return Err(BloodBankError::conflict(
                        "request",
                        request_id,
                        request.status,
                        "no units allocated to fulfill",
                    ));
                }
                if total > request.units_required {
                    return Err(over_allocation(request, total));
                }

                let next = if total == request.units_required {
                    RequestStatus::Fulfilled
                } else {
                    RequestStatus::PartiallyFulfilled
                };
                if !request.status.can_transition_to(next) {
                    return Err(BloodBankError::conflict(
                        "request",
                        request_id,
                        request.status,
                        format!("cannot fulfill a {} request", request.status),
                    ));
                }

                request.allocated_blood.extend(additional_lots);
                stamp(request, next, actor, now);

                let notification = if next == RequestStatus::Fulfilled {
                    Notification::RequestFulfilled {
                        request_id,
                        hospital_id: request.hospital_id,
                        units: total,
                    }
                } else {
                    Notification::RequestPartiallyFulfilled {
                        request_id,
                        hospital_id: request.hospital_id,
                        units_fulfilled: total,
                        units_required: request.units_required,
                    }
                };
                Ok(smallvec![notify(env, notification)])
            },

            RequestAction::NotificationFailed { event, reason } => {
                tracing::warn!(event, %reason, "Notification not delivered");
                state.undelivered_notifications += 1;
                Ok(smallvec![Effect::None])
            },
        }
    }
}

impl Reducer for RequestReducer {
    type State = RequestLedger;
    type Action = RequestAction;
    type Environment = ProductionRequestEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        state.last_error = None;
        match Self::apply(state, action, env) {
            Ok(effects) => effects,
            Err(error) => {
                tracing::debug!(%error, "Request action refused");
                state.last_error = Some(error);
                smallvec![Effect::None]
            },
        }
    }
}

/// The request, if it exists and may move to `next`.
fn checked<'a>(
    state: &'a mut RequestLedger,
    request_id: RequestId,
    next: RequestStatus,
    verb: &str,
) -> Result<&'a mut BloodRequest> {
    let request = state
        .get_mut(&request_id)
        .ok_or_else(|| BloodBankError::not_found("request", request_id))?;
    if !request.status.can_transition_to(next) {
        return Err(BloodBankError::conflict(
            "request",
            request_id,
            request.status,
            format!("cannot {verb} a {} request", request.status),
        ));
    }
    Ok(request)
}

fn stamp(
    request: &mut BloodRequest,
    status: RequestStatus,
    actor: Actor,
    now: chrono::DateTime<chrono::Utc>,
) {
    request.status = status;
    request.processed_by = Some(actor);
    request.processed_at = Some(now);
    request.updated_at = now;
}

fn over_allocation(request: &BloodRequest, units: u32) -> BloodBankError {
    BloodBankError::Validation(format!(
        "allocation of {units} units would exceed the {} required by request {}",
        request.units_required,
        request.id
    ))
}

fn approved(request: &BloodRequest) -> Notification {
    Notification::RequestApproved {
        request_id: request.id,
        hospital_id: request.hospital_id,
        blood_type: request.blood_type,
        units_required: request.units_required,
        units_allocated: request.allocated_total(),
        auto_approved: request.auto_approved,
    }
}

/// Deliver `notification`; a refusal feeds back as `NotificationFailed`.
fn notify(env: &ProductionRequestEnvironment, notification: Notification) -> Effect<RequestAction> {
    let notifier = env.notifier();
    async_effect! {
        let event = notification.event();
        match notifier.notify(notification).await {
            Ok(()) => None,
            Err(error) => Some(RequestAction::NotificationFailed {
                event,
                reason: error.to_string(),
            }),
        }
    }
}
