//! Tests for the request reducer and store.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use super::*;
use crate::allocation::{AllocatedLot, AllocationEngine};
use crate::error::BloodBankError;
use crate::inventory::{InMemoryInventoryStore, InventoryStore};
use crate::mocks::{FaultyInventoryStore, RecordingNotifier};
use crate::notification::{LowStockThresholds, Notification};
use crate::types::{
    Actor, BloodType, ComponentType, DonorId, HospitalId, InventoryUnit, RequestId, TestPanel,
    UnitId, UnitStatus, UserId,
};
use bloodbank_core::environment::Clock;
use bloodbank_core::reducer::Reducer;
use bloodbank_testing::{assertions, test_clock, ReducerTest};
use chrono::Duration;
use std::sync::Arc;

fn env_with(notifier: RecordingNotifier) -> ProductionRequestEnvironment {
    ProductionRequestEnvironment::new(Arc::new(test_clock()), Arc::new(notifier))
}

fn test_env() -> ProductionRequestEnvironment {
    env_with(RecordingNotifier::new())
}

fn new_request(blood_type: BloodType, units: u32, urgency: Urgency) -> NewRequest {
    NewRequest {
        hospital_id: HospitalId::new(),
        requester_id: UserId::new(),
        recipient_id: None,
        blood_type,
        units_required: units,
        urgency,
        required_by: test_clock().now() + Duration::days(1),
        reason: Some("elective surgery".to_string()),
    }
}

fn submit(request_id: RequestId, units: u32, auto_approve: bool) -> RequestAction {
    RequestAction::Submit {
        request_id,
        request: new_request(BloodType::OPositive, units, Urgency::Low),
        auto_approve,
    }
}

fn lot(units: u32) -> AllocatedLot {
    AllocatedLot {
        unit_id: UnitId::new(),
        units,
        lot_units: units,
        allocation_date: test_clock().now(),
    }
}

fn operator() -> Actor {
    Actor::User(UserId::new())
}

// ============================================================================
// Reducer
// ============================================================================

#[test]
fn submit_creates_pending_request_without_effects() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .when_action(submit(request_id, 2, false))
        .then_state(move |state| {
            let request = state.get(&request_id).unwrap();
            assert_eq!(request.status, RequestStatus::Pending);
            assert!(request.allocated_blood.is_empty());
            assert!(request.processed_by.is_none());
            assert!(state.last_error.is_none());
        })
        .then_effects(assertions::assert_no_effects)
        .run();
}

#[test]
fn auto_approved_submission_notifies_without_lots() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .when_action(submit(request_id, 2, true))
        .then_state(move |state| {
            let request = state.get(&request_id).unwrap();
            assert_eq!(request.status, RequestStatus::Approved);
            assert!(request.auto_approved);
            assert_eq!(request.processed_by, Some(Actor::System));
            assert_eq!(request.allocated_total(), 0);
        })
        .then_effects(|effects| {
            assertions::assert_effects_count(effects, 1);
            assertions::assert_has_future_effect(effects);
        })
        .run();
}

#[test]
fn approve_records_lots_and_approver() {
    let request_id = RequestId::new();
    let actor = operator();
    let lots = vec![lot(1), lot(1)];
    let expected = lots.clone();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![submit(request_id, 2, false)])
        .when_action(RequestAction::Approve {
            request_id,
            actor,
            lots,
        })
        .then_state(move |state| {
            let request = state.get(&request_id).unwrap();
            assert_eq!(request.status, RequestStatus::Approved);
            assert_eq!(request.allocated_blood, expected);
            assert_eq!(request.processed_by, Some(actor));
            assert_eq!(request.processed_at, Some(test_clock().now()));
        })
        .then_effects(assertions::assert_has_future_effect)
        .run();
}

#[test]
fn approve_refuses_more_than_required() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![submit(request_id, 2, false)])
        .when_action(RequestAction::Approve {
            request_id,
            actor: operator(),
            lots: vec![lot(2), lot(1)],
        })
        .then_state(move |state| {
            assert_eq!(state.get(&request_id).unwrap().status, RequestStatus::Pending);
            assert!(matches!(state.last_error, Some(BloodBankError::Validation(_))));
        })
        .then_effects(assertions::assert_no_effects)
        .run();
}

#[test]
fn reject_requires_a_reason() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![submit(request_id, 1, false)])
        .when_action(RequestAction::Reject {
            request_id,
            actor: operator(),
            reason: "   ".to_string(),
        })
        .then_state(move |state| {
            assert_eq!(state.get(&request_id).unwrap().status, RequestStatus::Pending);
            assert!(matches!(state.last_error, Some(BloodBankError::Validation(_))));
        })
        .run();
}

#[test]
fn reject_records_reason() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![submit(request_id, 1, false)])
        .when_action(RequestAction::Reject {
            request_id,
            actor: operator(),
            reason: "patient transferred".to_string(),
        })
        .then_state(move |state| {
            let request = state.get(&request_id).unwrap();
            assert_eq!(request.status, RequestStatus::Rejected);
            assert_eq!(request.rejection_reason.as_deref(), Some("patient transferred"));
        })
        .then_effects(assertions::assert_has_future_effect)
        .run();
}

#[test]
fn approved_request_cannot_be_rejected() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![submit(request_id, 1, true)])
        .when_action(RequestAction::Reject {
            request_id,
            actor: operator(),
            reason: "changed my mind".to_string(),
        })
        .then_state(move |state| {
            assert!(matches!(
                &state.last_error,
                Some(BloodBankError::Conflict { current, .. }) if current == "approved"
            ));
        })
        .run();
}

#[test]
fn fulfilling_exact_total_lands_on_fulfilled() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![
            submit(request_id, 2, false),
            RequestAction::Approve {
                request_id,
                actor: operator(),
                lots: vec![lot(1), lot(1)],
            },
        ])
        .when_action(RequestAction::Fulfill {
            request_id,
            actor: operator(),
            additional_lots: Vec::new(),
        })
        .then_state(move |state| {
            let request = state.get(&request_id).unwrap();
            assert_eq!(request.status, RequestStatus::Fulfilled);
            assert_eq!(request.allocated_total(), 2);
        })
        .then_effects(assertions::assert_has_future_effect)
        .run();
}

#[test]
fn short_fulfilment_lands_on_partially_fulfilled() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![
            submit(request_id, 5, false),
            RequestAction::Approve {
                request_id,
                actor: operator(),
                lots: vec![lot(2)],
            },
        ])
        .when_action(RequestAction::Fulfill {
            request_id,
            actor: operator(),
            additional_lots: Vec::new(),
        })
        .then_state(move |state| {
            let request = state.get(&request_id).unwrap();
            assert_eq!(request.status, RequestStatus::PartiallyFulfilled);
            assert_eq!(request.outstanding(), 3);
        })
        .run();
}

#[test]
fn top_up_completes_partially_fulfilled_request() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![
            submit(request_id, 3, false),
            RequestAction::Approve {
                request_id,
                actor: operator(),
                lots: vec![lot(1)],
            },
            RequestAction::Fulfill {
                request_id,
                actor: operator(),
                additional_lots: Vec::new(),
            },
        ])
        .when_action(RequestAction::Fulfill {
            request_id,
            actor: operator(),
            additional_lots: vec![lot(2)],
        })
        .then_state(move |state| {
            let request = state.get(&request_id).unwrap();
            assert_eq!(request.status, RequestStatus::Fulfilled);
            assert_eq!(request.allocated_blood.len(), 2);
        })
        .run();
}

#[test]
fn nothing_allocated_cannot_be_fulfilled() {
    let request_id = RequestId::new();

    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .given_actions(vec![submit(request_id, 2, true)])
        .when_action(RequestAction::Fulfill {
            request_id,
            actor: operator(),
            additional_lots: Vec::new(),
        })
        .then_state(move |state| {
            assert_eq!(state.get(&request_id).unwrap().status, RequestStatus::Approved);
            assert!(matches!(state.last_error, Some(BloodBankError::Conflict { .. })));
        })
        .run();
}

#[test]
fn terminal_requests_accept_no_transition() {
    let reducer = RequestReducer::new();
    let env = test_env();

    for close in ["fulfill", "reject", "cancel"] {
        let mut state = RequestLedger::new();
        let request_id = RequestId::new();
        reducer.reduce(&mut state, submit(request_id, 1, false), &env);
        match close {
            "fulfill" => {
                reducer.reduce(
                    &mut state,
                    RequestAction::Approve {
                        request_id,
                        actor: operator(),
                        lots: vec![lot(1)],
                    },
                    &env,
                );
                reducer.reduce(
                    &mut state,
                    RequestAction::Fulfill {
                        request_id,
                        actor: operator(),
                        additional_lots: Vec::new(),
                    },
                    &env,
                );
            },
            "reject" => {
                reducer.reduce(
                    &mut state,
                    RequestAction::Reject {
                        request_id,
                        actor: operator(),
                        reason: "duplicate".to_string(),
                    },
                    &env,
                );
            },
            _ => {
                reducer.reduce(
                    &mut state,
                    RequestAction::Cancel {
                        request_id,
                        actor: operator(),
                    },
                    &env,
                );
            },
        }
        let closed = state.get(&request_id).unwrap().clone();
        assert!(closed.status.is_terminal());

        let attempts = vec![
            RequestAction::Approve {
                request_id,
                actor: operator(),
                lots: vec![lot(1)],
            },
            RequestAction::Reject {
                request_id,
                actor: operator(),
                reason: "late".to_string(),
            },
            RequestAction::Cancel {
                request_id,
                actor: operator(),
            },
            RequestAction::Fulfill {
                request_id,
                actor: operator(),
                additional_lots: vec![lot(1)],
            },
        ];
        for attempt in attempts {
            reducer.reduce(&mut state, attempt, &env);
            assert!(state.last_error.is_some(), "{close}: transition out of terminal accepted");
            assert_eq!(state.get(&request_id).unwrap(), &closed);
        }
    }
}

#[test]
fn unknown_request_is_not_found() {
    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .when_action(RequestAction::Cancel {
            request_id: RequestId::new(),
            actor: operator(),
        })
        .then_state(|state| {
            assert!(matches!(
                state.last_error,
                Some(BloodBankError::NotFound { entity: "request", .. })
            ));
        })
        .run();
}

#[test]
fn failed_notification_is_counted() {
    ReducerTest::new(RequestReducer::new())
        .with_env(test_env())
        .given_state(RequestLedger::new())
        .when_action(RequestAction::NotificationFailed {
            event: "request_approved",
            reason: "gateway down".to_string(),
        })
        .then_state(|state| assert_eq!(state.undelivered_notifications, 1))
        .run();
}

// ============================================================================
// Store
// ============================================================================

fn shelf_unit(blood_type: BloodType, units: u32, expires_in_days: i64) -> InventoryUnit {
    let now = test_clock().now();
    let expiry_date = now + Duration::days(expires_in_days);
    InventoryUnit {
        id: UnitId::new(),
        blood_type,
        component: ComponentType::WholeBlood,
        units,
        collection_date: expiry_date - ComponentType::WholeBlood.shelf_life(),
        expiry_date,
        donor_id: DonorId::new(),
        status: UnitStatus::Available,
        test_results: TestPanel::all_negative(),
        storage_location: None,
        notes: None,
        reserved_for: None,
        used_for: None,
        updated_by: Actor::System,
        updated_at: now,
    }
}

async fn store_with(
    units: Vec<InventoryUnit>,
    notifier: RecordingNotifier,
) -> (RequestLifecycleStore<InMemoryInventoryStore>, Arc<InMemoryInventoryStore>) {
    let inventory = Arc::new(InMemoryInventoryStore::new());
    for unit in units {
        inventory.insert(unit).await.unwrap();
    }
    let store = RequestLifecycleStore::new(
        AllocationEngine::new(Arc::clone(&inventory)),
        env_with(notifier),
        LowStockThresholds::default(),
    );
    (store, inventory)
}

#[tokio::test]
async fn store_runs_notification_effects() {
    let notifier = RecordingNotifier::new();
    let (store, _) = store_with(
        vec![shelf_unit(BloodType::BPositive, 1, 10)],
        notifier.clone(),
    )
    .await;

    let request = store
        .create(new_request(BloodType::BPositive, 1, Urgency::High))
        .await
        .unwrap();
    assert_eq!(request.status, RequestStatus::Pending);
    assert!(notifier.sent().is_empty());

    store
        .transition(request.id, RequestCommand::Approve { accept_partial: false }, operator())
        .await
        .unwrap();
    assert!(notifier.events().contains(&"request_approved"));
}

#[tokio::test]
async fn refused_notification_does_not_roll_back() {
    let (store, _) = store_with(
        vec![shelf_unit(BloodType::BPositive, 1, 10)],
        RecordingNotifier::failing(),
    )
    .await;

    let request = store
        .create(new_request(BloodType::BPositive, 1, Urgency::Medium))
        .await
        .unwrap();
    let approved = store
        .transition(request.id, RequestCommand::Approve { accept_partial: false }, operator())
        .await
        .unwrap();

    assert_eq!(approved.status, RequestStatus::Approved);
    assert!(store.state().await.undelivered_notifications >= 1);
}

#[tokio::test]
async fn concurrent_transition_on_same_request_is_refused() {
    let (store, _) = store_with(
        vec![shelf_unit(BloodType::ONegative, 1, 10)],
        RecordingNotifier::new(),
    )
    .await;
    let request = store
        .create(new_request(BloodType::ONegative, 1, Urgency::Critical))
        .await
        .unwrap();

    let held = store.begin(request.id).unwrap();
    let result = store
        .transition(request.id, RequestCommand::Cancel, operator())
        .await;
    assert!(matches!(
        result,
        Err(BloodBankError::Conflict { ref reason, .. }) if reason == "transition in progress"
    ));

    drop(held);
    let cancelled = store
        .transition(request.id, RequestCommand::Cancel, operator())
        .await
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
}

#[tokio::test]
async fn approval_that_drops_stock_below_minimum_notifies() {
    let notifier = RecordingNotifier::new();
    let (store, _) = store_with(
        vec![
            shelf_unit(BloodType::AbNegative, 2, 10),
            shelf_unit(BloodType::AbNegative, 1, 12),
        ],
        notifier.clone(),
    )
    .await;

    let request = store
        .create(new_request(BloodType::AbNegative, 1, Urgency::High))
        .await
        .unwrap();
    store
        .transition(request.id, RequestCommand::Approve { accept_partial: false }, operator())
        .await
        .unwrap();

    let low = notifier
        .sent()
        .into_iter()
        .find(|notification| matches!(notification, Notification::LowStock { .. }));
    assert_eq!(
        low,
        Some(Notification::LowStock {
            blood_type: BloodType::AbNegative,
            available: 1,
            threshold: 3,
        })
    );
}

#[tokio::test]
async fn partially_fulfilled_request_tops_up_at_next_fulfilment() {
    let (store, inventory) = store_with(
        vec![shelf_unit(BloodType::APositive, 1, 5)],
        RecordingNotifier::new(),
    )
    .await;
    let request = store
        .create(new_request(BloodType::APositive, 2, Urgency::High))
        .await
        .unwrap();

    let approved = store
        .transition(request.id, RequestCommand::Approve { accept_partial: true }, operator())
        .await
        .unwrap();
    assert_eq!(approved.allocated_total(), 1);

    let partial = store
        .transition(request.id, RequestCommand::Fulfill, operator())
        .await
        .unwrap();
    assert_eq!(partial.status, RequestStatus::PartiallyFulfilled);

    // Nothing on the shelf yet: the top-up fails and the status holds
    let result = store
        .transition(request.id, RequestCommand::Fulfill, operator())
        .await;
    assert!(matches!(result, Err(BloodBankError::InsufficientStock { .. })));
    assert_eq!(
        store.get(request.id).await.unwrap().status,
        RequestStatus::PartiallyFulfilled
    );

    let restock = shelf_unit(BloodType::APositive, 1, 8);
    inventory.insert(restock.clone()).await.unwrap();
    let fulfilled = store
        .transition(request.id, RequestCommand::Fulfill, operator())
        .await
        .unwrap();
    assert_eq!(fulfilled.status, RequestStatus::Fulfilled);
    assert_eq!(fulfilled.allocated_total(), 2);
    assert_eq!(
        inventory.get(restock.id).await.unwrap().used_for,
        Some(request.id)
    );
}

#[tokio::test]
async fn list_filters_by_status_and_type() {
    let (store, _) = store_with(
        vec![shelf_unit(BloodType::OPositive, 3, 10)],
        RecordingNotifier::new(),
    )
    .await;

    let auto = store
        .create(new_request(BloodType::OPositive, 1, Urgency::Low))
        .await
        .unwrap();
    let pending = store
        .create(new_request(BloodType::ONegative, 1, Urgency::Low))
        .await
        .unwrap();

    assert_eq!(auto.status, RequestStatus::Approved);
    assert_eq!(pending.status, RequestStatus::Pending);

    let approved = store.list(Some(RequestStatus::Approved), None).await;
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].id, auto.id);
    assert_eq!(store.list(None, Some(BloodType::ONegative)).await.len(), 1);
    assert_eq!(store.list(None, None).await.len(), 2);
}

async fn faulty_store_with(
    units: Vec<InventoryUnit>,
) -> (RequestLifecycleStore<FaultyInventoryStore>, Arc<FaultyInventoryStore>) {
    let inventory = Arc::new(FaultyInventoryStore::new());
    for unit in units {
        inventory.insert(unit).await.unwrap();
    }
    let store = RequestLifecycleStore::new(
        AllocationEngine::new(Arc::clone(&inventory)),
        test_env(),
        LowStockThresholds::default(),
    );
    (store, inventory)
}

#[tokio::test]
async fn cancel_that_cannot_release_keeps_request_approved() {
    let first = shelf_unit(BloodType::BNegative, 1, 10);
    let second = shelf_unit(BloodType::BNegative, 1, 12);
    let (store, inventory) = faulty_store_with(vec![first.clone(), second.clone()]).await;
    let request = store
        .create(new_request(BloodType::BNegative, 2, Urgency::High))
        .await
        .unwrap();
    store
        .transition(request.id, RequestCommand::Approve { accept_partial: false }, operator())
        .await
        .unwrap();

    inventory.fail_transitions_after(1);
    let err = store
        .transition(request.id, RequestCommand::Cancel, operator())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    let held = store.get(request.id).await.unwrap();
    assert_eq!(held.status, RequestStatus::Approved);
    assert_eq!(held.allocated_blood.len(), 2);
    assert_eq!(inventory.get(second.id).await.unwrap().status, UnitStatus::Reserved);

    inventory.heal();
    let cancelled = store
        .transition(request.id, RequestCommand::Cancel, operator())
        .await
        .unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    for unit in [&first, &second] {
        let shelf = inventory.get(unit.id).await.unwrap();
        assert_eq!(shelf.status, UnitStatus::Available);
        assert_eq!(shelf.reserved_for, None);
    }
}

#[tokio::test]
async fn interrupted_fulfilment_completes_on_retry() {
    let first = shelf_unit(BloodType::ONegative, 1, 10);
    let second = shelf_unit(BloodType::ONegative, 1, 12);
    let (store, inventory) = faulty_store_with(vec![first.clone(), second.clone()]).await;
    let request = store
        .create(new_request(BloodType::ONegative, 2, Urgency::Critical))
        .await
        .unwrap();
    store
        .transition(request.id, RequestCommand::Approve { accept_partial: false }, operator())
        .await
        .unwrap();

    inventory.fail_transitions_after(1);
    let err = store
        .transition(request.id, RequestCommand::Fulfill, operator())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(store.get(request.id).await.unwrap().status, RequestStatus::Approved);
    assert_eq!(inventory.get(first.id).await.unwrap().status, UnitStatus::Used);
    assert_eq!(inventory.get(second.id).await.unwrap().status, UnitStatus::Reserved);

    inventory.heal();
    let fulfilled = store
        .transition(request.id, RequestCommand::Fulfill, operator())
        .await
        .unwrap();
    assert_eq!(fulfilled.status, RequestStatus::Fulfilled);
    for unit in [&first, &second] {
        assert_eq!(inventory.get(unit.id).await.unwrap().used_for, Some(request.id));
    }
}
