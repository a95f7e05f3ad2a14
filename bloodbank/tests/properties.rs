//! Property tests for allocation, expiry and the request state machine.

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use bloodbank::donors::InMemoryDonorDirectory;
use bloodbank::mocks::RecordingNotifier;
use bloodbank::{
    Actor, AllocationEngine, BloodBank, BloodBankOptions, BloodType, ComponentType, DonorId,
    ErrorKind, ExpirySweeper, HospitalId, InMemoryInventoryStore, InventoryStore, InventoryUnit,
    LowStockThresholds, NewRequest, NewUnit, RequestCommand, RequestId, ShortfallPolicy,
    TestPanel, UnitId, UnitStatus, Urgency, UserId,
};
use bloodbank_core::environment::Clock;
use bloodbank_testing::{test_clock, ManualClock};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn lot(units: u32, expires_in_days: i64, now: DateTime<Utc>) -> InventoryUnit {
    let expiry_date = now + Duration::days(expires_in_days);
    InventoryUnit {
        id: UnitId::new(),
        blood_type: BloodType::OPositive,
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

async fn stocked(lots: &[(u32, i64)], now: DateTime<Utc>) -> Arc<InMemoryInventoryStore> {
    let store = Arc::new(InMemoryInventoryStore::new());
    for &(units, days) in lots {
        store.insert(lot(units, days, now)).await.unwrap();
    }
    store
}

proptest! {
    /// Allocation credits exactly what it can, never more than asked, and
    /// only ever takes the soonest-expiring lots.
    #[test]
    fn allocation_is_fefo_and_never_over_credits(
        lots in prop::collection::vec((1u32..4, 1i64..60), 0..12),
        needed in 1u32..15,
    ) {
        let now = test_clock().now();
        runtime().block_on(async {
            let store = stocked(&lots, now).await;
            let engine = AllocationEngine::new(Arc::clone(&store));
            let request_id = RequestId::new();
            let shelf: u32 = lots.iter().map(|(units, _)| units).sum();

            let result = engine
                .allocate(
                    request_id,
                    BloodType::OPositive,
                    needed,
                    ShortfallPolicy::AcceptPartial,
                    Actor::System,
                    now,
                )
                .await;

            let all = store.query(bloodbank::UnitQuery::new()).await.unwrap();
            if shelf == 0 {
                prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::InsufficientStock);
                return Ok(());
            }

            let allocation = result.unwrap();
            prop_assert!(allocation.credited() <= needed);
            prop_assert_eq!(allocation.credited(), needed.min(shelf));
            prop_assert!(allocation.physical() >= allocation.credited());

            let reserved: Vec<_> = all.iter().filter(|u| u.status == UnitStatus::Reserved).collect();
            prop_assert_eq!(reserved.len(), allocation.lots.len());
            prop_assert!(reserved.iter().all(|u| u.reserved_for == Some(request_id)));

            let expiries: HashMap<UnitId, DateTime<Utc>> =
                all.iter().map(|u| (u.id, u.expiry_date)).collect();
            let order: Vec<_> = allocation.lots.iter().map(|l| expiries[&l.unit_id]).collect();
            prop_assert!(order.windows(2).all(|w| w[0] <= w[1]));

            let latest_taken = order.iter().max().copied();
            for unit in all.iter().filter(|u| u.status == UnitStatus::Available) {
                prop_assert!(latest_taken.is_none_or(|latest| unit.expiry_date >= latest));
            }
            Ok(())
        })?;
    }

    /// A strict allocation that cannot be covered writes nothing.
    #[test]
    fn strict_shortfall_leaves_shelf_untouched(
        lots in prop::collection::vec((1u32..3, 1i64..30), 0..6),
        extra in 1u32..5,
    ) {
        let now = test_clock().now();
        runtime().block_on(async {
            let store = stocked(&lots, now).await;
            let engine = AllocationEngine::new(Arc::clone(&store));
            let shelf: u32 = lots.iter().map(|(units, _)| units).sum();

            let err = engine
                .allocate(
                    RequestId::new(),
                    BloodType::OPositive,
                    shelf + extra,
                    ShortfallPolicy::Reject,
                    Actor::System,
                    now,
                )
                .await
                .unwrap_err();

            prop_assert_eq!(err.shortfall(), Some(extra));
            let all = store.query(bloodbank::UnitQuery::new()).await.unwrap();
            prop_assert!(all.iter().all(|u| u.status == UnitStatus::Available));
            Ok(())
        })?;
    }

    /// Reserving and then releasing returns every lot to the shelf.
    #[test]
    fn release_undoes_reservation(
        lots in prop::collection::vec((1u32..4, 1i64..60), 1..10),
        needed in 1u32..20,
    ) {
        let now = test_clock().now();
        runtime().block_on(async {
            let store = stocked(&lots, now).await;
            let engine = AllocationEngine::new(Arc::clone(&store));
            let request_id = RequestId::new();

            let allocation = engine
                .allocate(
                    request_id,
                    BloodType::OPositive,
                    needed,
                    ShortfallPolicy::AcceptPartial,
                    Actor::System,
                    now,
                )
                .await
                .unwrap();
            let released = engine
                .release(request_id, &allocation.lots, Actor::System, now)
                .await
                .unwrap();

            prop_assert_eq!(released, allocation.lots.len());
            let all = store.query(bloodbank::UnitQuery::new()).await.unwrap();
            prop_assert!(all
                .iter()
                .all(|u| u.status == UnitStatus::Available && u.reserved_for.is_none()));
            Ok(())
        })?;
    }

    /// A sweep expires exactly the stale available units; a second sweep
    /// finds nothing.
    #[test]
    fn sweep_is_exact_and_idempotent(
        offsets in prop::collection::vec(-10i64..10, 0..15),
    ) {
        let clock = ManualClock::new(test_clock().now());
        runtime().block_on(async {
            let lots: Vec<_> = offsets.iter().map(|&days| (1, days)).collect();
            let store = stocked(&lots, clock.now()).await;
            let sweeper = ExpirySweeper::new(
                Arc::clone(&store),
                Arc::new(clock.clone()),
                LowStockThresholds::default(),
                Arc::new(RecordingNotifier::new()),
            );
            clock.advance(Duration::hours(1));

            let report = sweeper.sweep().await.unwrap();
            let stale = offsets.iter().filter(|&&days| days <= 0).count();
            prop_assert_eq!(report.expired.len(), stale);

            let now = clock.now();
            for unit in store.query(bloodbank::UnitQuery::new()).await.unwrap() {
                let expected = if unit.expiry_date < now {
                    UnitStatus::Expired
                } else {
                    UnitStatus::Available
                };
                prop_assert_eq!(unit.status, expected);
            }

            prop_assert!(sweeper.sweep().await.unwrap().expired.is_empty());
            Ok(())
        })?;
    }

    /// Whatever operators do, a terminal request never moves again and a
    /// request never holds more credited units than it asked for.
    #[test]
    fn terminal_requests_stay_terminal(
        shelf in 0usize..5,
        units_required in 1u32..5,
        urgency in prop::sample::select(vec![Urgency::Low, Urgency::High]),
        commands in prop::collection::vec(0u8..5, 1..10),
    ) {
        runtime().block_on(async {
            let clock = test_clock();
            let donors = Arc::new(InMemoryDonorDirectory::new());
            let bank = BloodBank::new(
                Arc::new(InMemoryInventoryStore::new()),
                Arc::clone(&donors),
                Arc::new(clock.clone()),
                Arc::new(RecordingNotifier::new()),
                BloodBankOptions::default(),
            );
            let donor = donors.register_eligible(BloodType::APositive).unwrap();
            for _ in 0..shelf {
                bank.add_unit(
                    NewUnit::new(donor, BloodType::APositive, clock.now() - Duration::days(1))
                        .test_results(TestPanel::all_negative()),
                    Actor::System,
                )
                .await
                .unwrap();
            }

            let request = bank
                .create_request(NewRequest {
                    hospital_id: HospitalId::new(),
                    requester_id: UserId::new(),
                    recipient_id: None,
                    blood_type: BloodType::APositive,
                    units_required,
                    urgency,
                    required_by: clock.now() + Duration::days(2),
                    reason: None,
                })
                .await
                .unwrap();
            let operator = Actor::User(UserId::new());

            let mut status = request.status;
            for code in commands {
                let command = match code {
                    0 => RequestCommand::Approve { accept_partial: false },
                    1 => RequestCommand::Approve { accept_partial: true },
                    2 => RequestCommand::Reject { reason: "clinical review".to_string() },
                    3 => RequestCommand::Fulfill,
                    _ => RequestCommand::Cancel,
                };
                let was_terminal = status.is_terminal();
                let result = bank.transition_request(request.id, command, operator).await;
                if was_terminal {
                    prop_assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
                }

                let current = bank.get_request(request.id).await.unwrap();
                prop_assert!(current.allocated_total() <= current.units_required);
                if was_terminal {
                    prop_assert_eq!(current.status, status);
                }
                status = current.status;
            }
            Ok(())
        })?;
    }
}
