//! Business metrics for the blood bank.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `bloodbank_units_added_total{blood_type}` - Units entered into inventory
//! - `bloodbank_unit_transitions_total{transition}` - Conditional writes applied
//!   (reserve, release, consume, expire)
//! - `bloodbank_transition_conflicts_total{transition}` - Conditional writes that
//!   lost their precondition
//! - `bloodbank_requests_total{status}` - Requests entering each status
//! - `bloodbank_allocation_shortfalls_total{blood_type}` - Allocations refused
//!   for lack of stock
//! - `bloodbank_sweeps_total` - Expiry sweeps run
//!
//! ## Gauges
//! - `bloodbank_stock_available{blood_type}` - Allocatable units on the shelf
//!
//! ## Histograms
//! - `bloodbank_sweep_expired_units` - Units expired per sweep

use crate::request_lifecycle::RequestStatus;
use crate::types::{BloodType, UnitTransition};
use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register metric descriptions. Call once at startup.
pub fn register_metrics() {
    describe_counter!(
        "bloodbank_units_added_total",
        "Units entered into inventory by blood type"
    );
    describe_counter!(
        "bloodbank_unit_transitions_total",
        "Unit status transitions applied by kind"
    );
    describe_counter!(
        "bloodbank_transition_conflicts_total",
        "Unit status transitions rejected because the unit changed underneath"
    );
    describe_counter!(
        "bloodbank_requests_total",
        "Blood requests entering each status"
    );
    describe_counter!(
        "bloodbank_allocation_shortfalls_total",
        "Allocation attempts refused for insufficient stock"
    );
    describe_counter!("bloodbank_sweeps_total", "Expiry sweeps run");
    describe_gauge!(
        "bloodbank_stock_available",
        "Allocatable units on the shelf by blood type"
    );
    describe_histogram!(
        "bloodbank_sweep_expired_units",
        "Units transitioned to expired per sweep"
    );

    tracing::info!("Blood bank metrics registered");
}

const fn transition_label(transition: UnitTransition) -> &'static str {
    match transition {
        UnitTransition::Reserve(_) => "reserve",
        UnitTransition::Release(_) => "release",
        UnitTransition::Consume(_) => "consume",
        UnitTransition::Expire => "expire",
    }
}

const fn status_label(status: RequestStatus) -> &'static str {
    match status {
        RequestStatus::Pending => "pending",
        RequestStatus::Approved => "approved",
        RequestStatus::PartiallyFulfilled => "partially_fulfilled",
        RequestStatus::Fulfilled => "fulfilled",
        RequestStatus::Rejected => "rejected",
        RequestStatus::Cancelled => "cancelled",
    }
}

/// Record units added to inventory.
pub fn record_units_added(blood_type: BloodType, units: u32) {
    metrics::counter!("bloodbank_units_added_total", "blood_type" => blood_type.as_str())
        .increment(u64::from(units));
}

/// Record an applied unit transition.
pub fn record_unit_transition(transition: UnitTransition) {
    metrics::counter!(
        "bloodbank_unit_transitions_total",
        "transition" => transition_label(transition)
    )
    .increment(1);
}

/// Record a unit transition that lost its precondition.
pub fn record_transition_conflict(transition: UnitTransition) {
    metrics::counter!(
        "bloodbank_transition_conflicts_total",
        "transition" => transition_label(transition)
    )
    .increment(1);
}

/// Record a request entering `status`.
pub fn record_request_status(status: RequestStatus) {
    metrics::counter!("bloodbank_requests_total", "status" => status_label(status)).increment(1);
}

/// Record a refused allocation.
pub fn record_allocation_shortfall(blood_type: BloodType) {
    metrics::counter!(
        "bloodbank_allocation_shortfalls_total",
        "blood_type" => blood_type.as_str()
    )
    .increment(1);
}

/// Record a completed sweep.
#[allow(clippy::cast_precision_loss)] // Counts stay far below 2^52
pub fn record_sweep(expired: usize) {
    metrics::counter!("bloodbank_sweeps_total").increment(1);
    metrics::histogram!("bloodbank_sweep_expired_units").record(expired as f64);
}

/// Update the allocatable-stock gauge for one type.
pub fn update_stock_available(blood_type: BloodType, available: u32) {
    metrics::gauge!("bloodbank_stock_available", "blood_type" => blood_type.as_str())
        .set(f64::from(available));
}
