//! ABO/Rh compatibility table for red cell transfusion.
//!
//! Advisory only: allocation always matches the exact blood type. These
//! lookups back donor-eligibility queries and the compatible-stock report.

use crate::types::BloodType;
use serde::{Deserialize, Serialize};

/// Donor/recipient sets for one blood type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    /// The type these sets describe
    pub blood_type: BloodType,
    /// Donor types this type can safely receive red cells from
    pub can_receive_from: Vec<BloodType>,
    /// Recipient types this type can safely donate red cells to
    pub can_donate_to: Vec<BloodType>,
}

/// Whether red cells of `donor` may be given to `recipient`.
///
/// ABO: the recipient must carry every antigen the donor carries
/// (O has none, AB has both). Rh: an Rh-negative recipient only takes
/// Rh-negative blood.
#[must_use]
pub const fn is_compatible(donor: BloodType, recipient: BloodType) -> bool {
    let (donor_a, donor_b) = abo_antigens(donor);
    let (recipient_a, recipient_b) = abo_antigens(recipient);

    let abo_ok = (!donor_a || recipient_a) && (!donor_b || recipient_b);
    let rh_ok = !donor.is_rh_positive() || recipient.is_rh_positive();

    abo_ok && rh_ok
}

const fn abo_antigens(blood_type: BloodType) -> (bool, bool) {
    match blood_type {
        BloodType::APositive | BloodType::ANegative => (true, false),
        BloodType::BPositive | BloodType::BNegative => (false, true),
        BloodType::AbPositive | BloodType::AbNegative => (true, true),
        BloodType::OPositive | BloodType::ONegative => (false, false),
    }
}

/// Donor types `recipient` can receive from.
///
/// The exact type comes first, then the remaining types in [`BloodType::ALL`]
/// order.
#[must_use]
pub fn can_receive_from(recipient: BloodType) -> Vec<BloodType> {
    std::iter::once(recipient)
        .chain(
            BloodType::ALL
                .into_iter()
                .filter(|donor| *donor != recipient && is_compatible(*donor, recipient)),
        )
        .collect()
}

/// Recipient types `donor` can give to, exact type first.
#[must_use]
pub fn can_donate_to(donor: BloodType) -> Vec<BloodType> {
    std::iter::once(donor)
        .chain(
            BloodType::ALL
                .into_iter()
                .filter(|recipient| *recipient != donor && is_compatible(donor, *recipient)),
        )
        .collect()
}

/// Both directions for one type.
#[must_use]
pub fn lookup(blood_type: BloodType) -> Compatibility {
    Compatibility {
        blood_type,
        can_receive_from: can_receive_from(blood_type),
        can_donate_to: can_donate_to(blood_type),
    }
}
