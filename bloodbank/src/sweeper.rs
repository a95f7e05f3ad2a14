//! Expiry sweeper.
//!
//! Moves available units whose expiry date has passed to `expired`. Reserved
//! and used units past expiry are not touched: converting a unit already
//! committed to a request would break that request's allocation.
//!
//! A stale unit stops counting as stock the moment its expiry passes; the
//! sweep is where that drop is recognised, so low-stock notifications for
//! expiry fire here.

use crate::error::{BloodBankError, Result};
use crate::inventory::{InventoryStore, UnitQuery};
use crate::metrics;
use crate::notification::{LowStockThresholds, Notifier};
use crate::types::{Actor, BloodType, UnitId, UnitStatus, UnitTransition};
use bloodbank_core::environment::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Units transitioned to expired
    pub expired: Vec<UnitId>,
    /// Candidates that changed status before they could be expired
    pub skipped: usize,
    /// Types whose stock fell below their minimum with this sweep
    pub low_stock: Vec<BloodType>,
}

/// Batch-expires stale available units.
pub struct ExpirySweeper<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    thresholds: LowStockThresholds,
    notifier: Arc<dyn Notifier>,
}

impl<S: InventoryStore> ExpirySweeper<S> {
    /// Create a sweeper over `store` that reports low stock to `notifier`.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        thresholds: LowStockThresholds,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            clock,
            thresholds,
            notifier,
        }
    }

    /// Expire every available unit whose expiry date is before now.
    ///
    /// Each unit goes through the same conditional write the allocation
    /// engine uses, so a unit reserved between the query and the write is
    /// skipped rather than expired. Running twice with no new expirations
    /// transitions nothing the second time.
    ///
    /// For every type that lost units, stock before the expiry is taken as
    /// the current allocatable stock plus the screened units just expired;
    /// crossing below the minimum sends a low-stock notification.
    ///
    /// # Errors
    ///
    /// [`BloodBankError::Storage`] if the store fails.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let candidates = self
            .store
            .query(
                UnitQuery::new()
                    .status(UnitStatus::Available)
                    .expires_before(now),
            )
            .await?;

        let mut report = SweepReport::default();
        let mut lost: BTreeMap<BloodType, u32> = BTreeMap::new();
        for unit in candidates {
            match self
                .store
                .transition(unit.id, UnitTransition::Expire, Actor::System, now)
                .await
            {
                Ok(expired) => {
                    metrics::record_unit_transition(UnitTransition::Expire);
                    tracing::debug!(
                        unit_id = %expired.id,
                        blood_type = %expired.blood_type,
                        expiry_date = %expired.expiry_date,
                        "Unit expired"
                    );
                    let units = if expired.test_results.passed() {
                        expired.units
                    } else {
                        0
                    };
                    let entry = lost.entry(expired.blood_type).or_default();
                    *entry = entry.saturating_add(units);
                    report.expired.push(expired.id);
                },
                Err(error @ (BloodBankError::Conflict { .. } | BloodBankError::NotFound { .. })) => {
                    metrics::record_transition_conflict(UnitTransition::Expire);
                    warn!(unit_id = %unit.id, %error, "Unit changed before it could be expired");
                    report.skipped += 1;
                },
                Err(error) => return Err(error),
            }
        }

        for (blood_type, units) in lost {
            if self.check_low_stock(blood_type, units, now).await? {
                report.low_stock.push(blood_type);
            }
        }

        metrics::record_sweep(report.expired.len());
        info!(
            expired = report.expired.len(),
            skipped = report.skipped,
            low_stock = report.low_stock.len(),
            "Expiry sweep complete"
        );
        Ok(report)
    }

    /// Notify if losing `lost` units took `blood_type` below its minimum.
    async fn check_low_stock(
        &self,
        blood_type: BloodType,
        lost: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let after = self
            .store
            .query(UnitQuery::allocatable(blood_type, now))
            .await?
            .iter()
            .fold(0u32, |sum, unit| sum.saturating_add(unit.units));
        metrics::update_stock_available(blood_type, after);

        let Some(notification) = self
            .thresholds
            .check(blood_type, after.saturating_add(lost), after)
        else {
            return Ok(false);
        };
        warn!(%blood_type, available = after, "Stock below minimum after expiry");
        if let Err(error) = self.notifier.notify(notification).await {
            warn!(%error, "Low-stock notification not delivered");
        }
        Ok(true)
    }

    /// Run [`Self::sweep`] every `interval` until `shutdown` fires.
    ///
    /// The first sweep runs immediately. A failed sweep is logged and the
    /// loop carries on.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Expiry sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("Expiry sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            error!(error = %e, "Expiry sweep failed");
                        }
                    }
                }
            }

            info!("Expiry sweeper stopped");
        })
    }
}
