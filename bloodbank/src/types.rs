//! Domain types for the blood bank.
//!
//! Identifiers, blood groups, test panels and the [`InventoryUnit`] record.
//! Request-side types live in [`crate::request_lifecycle::types`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BloodBankError;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an inventory unit (a lot)
    UnitId
);
uuid_id!(
    /// Unique identifier for a blood request
    RequestId
);
uuid_id!(
    /// Reference to a donor of record
    DonorId
);
uuid_id!(
    /// Opaque reference to a hospital; never dereferenced by the engine
    HospitalId
);
uuid_id!(
    /// Opaque reference to a user (requester, operator)
    UserId
);
uuid_id!(
    /// Opaque reference to a transfusion recipient
    PatientId
);

/// Who performed a state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Actor {
    /// An authenticated user
    User(UserId),
    /// The engine itself (auto-approval, expiry sweep)
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::System => write!(f, "system"),
        }
    }
}

// ============================================================================
// Blood groups
// ============================================================================

/// ABO group with Rh factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BloodType {
    /// A positive
    #[serde(rename = "A+")]
    APositive,
    /// A negative
    #[serde(rename = "A-")]
    ANegative,
    /// B positive
    #[serde(rename = "B+")]
    BPositive,
    /// B negative
    #[serde(rename = "B-")]
    BNegative,
    /// AB positive
    #[serde(rename = "AB+")]
    AbPositive,
    /// AB negative
    #[serde(rename = "AB-")]
    AbNegative,
    /// O positive
    #[serde(rename = "O+")]
    OPositive,
    /// O negative
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodType {
    /// All eight blood types
    pub const ALL: [Self; 8] = [
        Self::APositive,
        Self::ANegative,
        Self::BPositive,
        Self::BNegative,
        Self::AbPositive,
        Self::AbNegative,
        Self::OPositive,
        Self::ONegative,
    ];

    /// Conventional notation, e.g. `"AB-"`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::APositive => "A+",
            Self::ANegative => "A-",
            Self::BPositive => "B+",
            Self::BNegative => "B-",
            Self::AbPositive => "AB+",
            Self::AbNegative => "AB-",
            Self::OPositive => "O+",
            Self::ONegative => "O-",
        }
    }

    /// Whether the Rh(D) antigen is present
    #[must_use]
    pub const fn is_rh_positive(self) -> bool {
        matches!(
            self,
            Self::APositive | Self::BPositive | Self::AbPositive | Self::OPositive
        )
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloodType {
    type Err = BloodBankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|blood_type| blood_type.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BloodBankError::Validation(format!("unknown blood type '{s}'")))
    }
}

// ============================================================================
// Components
// ============================================================================

/// Blood component, which determines shelf life.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    /// Whole blood (CPDA-1)
    #[default]
    WholeBlood,
    /// Packed red blood cells (additive solution)
    PackedRedCells,
    /// Platelet concentrate
    Platelets,
    /// Fresh frozen plasma
    FreshFrozenPlasma,
    /// Cryoprecipitate
    Cryoprecipitate,
}

impl ComponentType {
    /// Storage shelf life from collection
    #[must_use]
    pub fn shelf_life(self) -> Duration {
        match self {
            Self::WholeBlood => Duration::days(35),
            Self::PackedRedCells => Duration::days(42),
            Self::Platelets => Duration::days(5),
            Self::FreshFrozenPlasma | Self::Cryoprecipitate => Duration::days(365),
        }
    }

    /// Expiry date for a unit of this component collected at `collected_at`
    #[must_use]
    pub fn expiry_for(self, collected_at: DateTime<Utc>) -> DateTime<Utc> {
        collected_at + self.shelf_life()
    }
}

// ============================================================================
// Screening
// ============================================================================

/// Result of one infectious-disease marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerResult {
    /// Not yet resulted
    #[default]
    Pending,
    /// Non-reactive
    Negative,
    /// Reactive
    Positive,
}

/// The four mandatory screening markers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPanel {
    /// HIV-1/2
    pub hiv: MarkerResult,
    /// Hepatitis B surface antigen
    pub hepatitis_b: MarkerResult,
    /// Hepatitis C
    pub hepatitis_c: MarkerResult,
    /// Syphilis
    pub syphilis: MarkerResult,
}

impl TestPanel {
    /// A fully resulted, all-negative panel
    #[must_use]
    pub const fn all_negative() -> Self {
        Self {
            hiv: MarkerResult::Negative,
            hepatitis_b: MarkerResult::Negative,
            hepatitis_c: MarkerResult::Negative,
            syphilis: MarkerResult::Negative,
        }
    }

    const fn markers(&self) -> [MarkerResult; 4] {
        [self.hiv, self.hepatitis_b, self.hepatitis_c, self.syphilis]
    }

    /// Every marker resulted and negative: the unit may be reserved or used
    #[must_use]
    pub fn passed(&self) -> bool {
        self.markers()
            .iter()
            .all(|marker| *marker == MarkerResult::Negative)
    }

    /// Any marker still pending
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.markers()
            .iter()
            .any(|marker| *marker == MarkerResult::Pending)
    }

    /// Any marker reactive
    #[must_use]
    pub fn has_positive(&self) -> bool {
        self.markers()
            .iter()
            .any(|marker| *marker == MarkerResult::Positive)
    }
}

// ============================================================================
// Inventory units
// ============================================================================

/// Lifecycle status of an inventory unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// On the shelf, may be allocated
    Available,
    /// Held for exactly one request
    Reserved,
    /// Transfused / issued (terminal)
    Used,
    /// Past expiry while available (terminal)
    Expired,
}

impl UnitStatus {
    /// The unit transition table.
    ///
    /// `available → reserved | expired`, `reserved → available | used`.
    /// `used` and `expired` have no outgoing edges.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Available, Self::Reserved | Self::Expired)
                | (Self::Reserved, Self::Available | Self::Used)
        )
    }

    /// No further transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Used | Self::Expired)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Used => "used",
            Self::Expired => "expired",
        })
    }
}

/// A conditional status change on one unit.
///
/// Each variant implies the status the unit must currently hold; the store
/// applies it only if that precondition still holds at write time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "request_id")]
pub enum UnitTransition {
    /// available → reserved, tagged `reserved_for`
    Reserve(RequestId),
    /// reserved → available; only the holding request may release
    Release(RequestId),
    /// reserved → used, tagged `used_for`; only the holding request may consume
    Consume(RequestId),
    /// available → expired
    Expire,
}

impl UnitTransition {
    /// Status the unit must hold for this transition to apply
    #[must_use]
    pub const fn expected(self) -> UnitStatus {
        match self {
            Self::Reserve(_) | Self::Expire => UnitStatus::Available,
            Self::Release(_) | Self::Consume(_) => UnitStatus::Reserved,
        }
    }

    /// Status after the transition
    #[must_use]
    pub const fn target(self) -> UnitStatus {
        match self {
            Self::Reserve(_) => UnitStatus::Reserved,
            Self::Release(_) => UnitStatus::Available,
            Self::Consume(_) => UnitStatus::Used,
            Self::Expire => UnitStatus::Expired,
        }
    }
}

/// A recorded blood lot, potentially bundling several physical units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUnit {
    /// Unit identifier
    pub id: UnitId,
    /// ABO/Rh group
    pub blood_type: BloodType,
    /// Component, which fixed the expiry date
    pub component: ComponentType,
    /// Lot size (at least 1); indivisible for allocation
    pub units: u32,
    /// When the blood was collected
    pub collection_date: DateTime<Utc>,
    /// Always later than `collection_date`
    pub expiry_date: DateTime<Utc>,
    /// Donor of record
    pub donor_id: DonorId,
    /// Lifecycle status
    pub status: UnitStatus,
    /// Screening results
    pub test_results: TestPanel,
    /// Fridge / shelf reference
    pub storage_location: Option<String>,
    /// Free-form notes
    pub notes: Option<String>,
    /// Request holding the reservation, while reserved
    pub reserved_for: Option<RequestId>,
    /// Request that consumed the unit, once used
    pub used_for: Option<RequestId>,
    /// Last actor to change the record
    pub updated_by: Actor,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl InventoryUnit {
    /// Available, fully screened negative and not expired at `now`.
    #[must_use]
    pub fn is_allocatable(&self, now: DateTime<Utc>) -> bool {
        self.status == UnitStatus::Available && self.test_results.passed() && self.expiry_date > now
    }

    /// Apply a transition whose precondition has already been checked.
    pub(crate) fn apply(&mut self, transition: UnitTransition, actor: Actor, at: DateTime<Utc>) {
        self.status = transition.target();
        match transition {
            UnitTransition::Reserve(request_id) => self.reserved_for = Some(request_id),
            UnitTransition::Release(_) => self.reserved_for = None,
            UnitTransition::Consume(request_id) => {
                self.reserved_for = None;
                self.used_for = Some(request_id);
            },
            UnitTransition::Expire => {},
        }
        self.updated_by = actor;
        self.updated_at = at;
    }
}

// ============================================================================
// Paging
// ============================================================================

/// A 1-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page number, starting at 1
    pub page: usize,
    /// Items per page
    pub per_page: usize,
}

impl PageRequest {
    /// Build a page request
    #[must_use]
    pub const fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }
    }
}

/// One page of results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Page number, starting at 1
    pub page: usize,
    /// Items per page
    pub per_page: usize,
    /// Total matching items across all pages
    pub total: usize,
}

impl<T> Page<T> {
    /// Slice `all` into the requested page.
    #[must_use]
    pub fn from_vec(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let page = request.page.max(1);
        let per_page = request.per_page.max(1);
        let items = all
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();
        Self {
            items,
            page,
            per_page,
            total,
        }
    }

    /// Number of pages at this page size
    #[must_use]
    pub const fn total_pages(&self) -> usize {
        self.total.div_ceil(self.per_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blood_type_parses_notation() {
        assert_eq!("O-".parse::<BloodType>().ok(), Some(BloodType::ONegative));
        assert_eq!("ab+".parse::<BloodType>().ok(), Some(BloodType::AbPositive));
        assert!("C+".parse::<BloodType>().is_err());
    }

    #[test]
    fn blood_type_serializes_as_notation() {
        let json = serde_json::to_string(&BloodType::AbNegative).ok();
        assert_eq!(json.as_deref(), Some("\"AB-\""));
    }

    #[test]
    fn expiry_is_always_after_collection() {
        let collected = Utc::now();
        for component in [
            ComponentType::WholeBlood,
            ComponentType::PackedRedCells,
            ComponentType::Platelets,
            ComponentType::FreshFrozenPlasma,
            ComponentType::Cryoprecipitate,
        ] {
            assert!(component.expiry_for(collected) > collected);
        }
    }

    #[test]
    fn panel_passes_only_when_all_negative() {
        assert!(TestPanel::all_negative().passed());
        assert!(!TestPanel::default().passed());
        assert!(TestPanel::default().is_pending());

        let reactive = TestPanel {
            hepatitis_b: MarkerResult::Positive,
            ..TestPanel::all_negative()
        };
        assert!(!reactive.passed());
        assert!(reactive.has_positive());
        assert!(!reactive.is_pending());
    }

    #[test]
    fn unit_transition_table() {
        use UnitStatus::{Available, Expired, Reserved, Used};

        assert!(Available.can_transition_to(Reserved));
        assert!(Available.can_transition_to(Expired));
        assert!(Reserved.can_transition_to(Available));
        assert!(Reserved.can_transition_to(Used));

        assert!(!Available.can_transition_to(Used));
        assert!(!Reserved.can_transition_to(Expired));
        for next in [Available, Reserved, Used, Expired] {
            assert!(!Used.can_transition_to(next));
            assert!(!Expired.can_transition_to(next));
        }
    }

    #[test]
    fn every_unit_transition_follows_the_table() {
        let request_id = RequestId::new();
        for transition in [
            UnitTransition::Reserve(request_id),
            UnitTransition::Release(request_id),
            UnitTransition::Consume(request_id),
            UnitTransition::Expire,
        ] {
            assert!(transition.expected().can_transition_to(transition.target()));
        }
    }

    #[test]
    fn page_slices_and_counts() {
        let page = Page::from_vec((1..=7).collect::<Vec<_>>(), PageRequest::new(2, 3));
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages(), 3);

        let beyond = Page::from_vec((1..=7).collect::<Vec<_>>(), PageRequest::new(9, 3));
        assert!(beyond.items.is_empty());
    }
}
