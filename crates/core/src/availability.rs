//! Storage availability over date ranges.
//!
//! A unit is free for a period when no claim (open order or contract) and no
//! manual block overlaps it. These functions are pure; repositories call them
//! while holding whatever lock makes the answer stick.

use std::cmp::Ordering;

use chrono::NaiveDate;

use crate::domain::{Storage, StorageOccupancy};
use crate::types::{RentalPeriod, StorageStatus};

/// Whether the unit can take a new rental for `period`.
#[must_use]
pub fn is_available(occupancy: &StorageOccupancy, period: &RentalPeriod) -> bool {
    occupancy
        .claims
        .iter()
        .all(|claim| !claim.period.overlaps(period))
        && occupancy
            .blocks
            .iter()
            .all(|block| !block.period.overlaps(period))
}

/// Number of units free for `period`.
#[must_use]
pub fn count_available(occupancies: &[StorageOccupancy], period: &RentalPeriod) -> usize {
    occupancies
        .iter()
        .filter(|occupancy| is_available(occupancy, period))
        .count()
}

/// The free unit a new order gets: lowest number first, then lowest id.
#[must_use]
pub fn first_available<'a>(
    occupancies: &'a [StorageOccupancy],
    period: &RentalPeriod,
) -> Option<&'a Storage> {
    occupancies
        .iter()
        .filter(|occupancy| is_available(occupancy, period))
        .map(|occupancy| &occupancy.storage)
        .min_by(|a, b| compare_units(a, b))
}

/// Assignment order of units: natural number order, then id.
#[must_use]
pub fn compare_units(a: &Storage, b: &Storage) -> Ordering {
    compare_numbers(&a.number, &b.number).then(a.id.cmp(&b.id))
}

/// Natural order of storage numbers, so `A2` comes before `A10`.
///
/// A number splits into a text prefix and a trailing run of digits. Prefixes
/// compare as text and digit runs by value; equal pairs fall back to the raw
/// text.
#[must_use]
pub fn compare_numbers(a: &str, b: &str) -> Ordering {
    let (a_prefix, a_digits) = split_number(a);
    let (b_prefix, b_digits) = split_number(b);
    a_prefix
        .cmp(b_prefix)
        .then_with(|| compare_digits(a_digits, b_digits))
        .then_with(|| a.cmp(b))
}

fn split_number(number: &str) -> (&str, &str) {
    let prefix_len = number
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .len();
    number.split_at(prefix_len)
}

/// Digit runs compare by value without parsing, so any length works.
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Status shown for the unit on `today`.
///
/// A block outranks a contract, which outranks an open order.
#[must_use]
pub fn derive_status(occupancy: &StorageOccupancy, today: NaiveDate) -> StorageStatus {
    use crate::domain::ClaimSource;

    if occupancy
        .blocks
        .iter()
        .any(|block| block.period.contains(today))
    {
        return StorageStatus::ManuallyUnavailable;
    }

    let mut status = StorageStatus::Available;
    for claim in occupancy.claims.iter().filter(|c| c.period.contains(today)) {
        match claim.source {
            ClaimSource::Contract(_) => return StorageStatus::Occupied,
            ClaimSource::Order(_) => status = StorageStatus::Reserved,
        }
    }
    status
}

/// Whether anything still holds the unit after `today`.
///
/// Units with such claims cannot be deleted or moved to another type.
#[must_use]
pub fn has_claims_after(occupancy: &StorageOccupancy, today: NaiveDate) -> bool {
    occupancy
        .claims
        .iter()
        .any(|claim| claim.period.reaches_past(today))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::domain::{Claim, ClaimSource, UnavailabilityBlock};
    use crate::types::{
        ContractId, OrderId, PlaceId, StorageId, StorageTypeId, UnavailabilityId, UserId,
    };

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, day).unwrap()
    }

    fn period(start: NaiveDate, end: Option<NaiveDate>) -> RentalPeriod {
        RentalPeriod::new(start, end)
    }

    fn unit(id: i32, number: &str) -> StorageOccupancy {
        StorageOccupancy {
            storage: Storage {
                id: StorageId::new(id),
                number: number.to_owned(),
                coordinates: None,
                storage_type_id: StorageTypeId::new(1),
                place_id: PlaceId::new(1),
                owner_id: UserId::new(1),
                status: StorageStatus::Available,
                commission_rate: None,
            },
            claims: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn with_order(mut occ: StorageOccupancy, p: RentalPeriod) -> StorageOccupancy {
        occ.claims.push(Claim {
            source: ClaimSource::Order(OrderId::new(1)),
            period: p,
        });
        occ
    }

    fn with_contract(mut occ: StorageOccupancy, p: RentalPeriod) -> StorageOccupancy {
        occ.claims.push(Claim {
            source: ClaimSource::Contract(ContractId::new(1)),
            period: p,
        });
        occ
    }

    fn with_block(mut occ: StorageOccupancy, p: RentalPeriod) -> StorageOccupancy {
        occ.blocks.push(UnavailabilityBlock {
            id: UnavailabilityId::new(1),
            storage_id: occ.storage.id,
            period: p,
            reason: "repairs".to_owned(),
        });
        occ
    }

    #[test]
    fn test_overlapping_claim_blocks_unit() {
        let occ = with_order(unit(1, "A1"), period(d(3, 1), Some(d(4, 1))));
        assert!(!is_available(&occ, &period(d(3, 15), Some(d(5, 1)))));
        assert!(is_available(&occ, &period(d(4, 1), Some(d(5, 1)))));
        assert!(!is_available(&occ, &period(d(1, 1), None)));
    }

    #[test]
    fn test_manual_block_hides_unit() {
        let occ = with_block(unit(1, "A1"), period(d(6, 1), None));
        assert!(is_available(&occ, &period(d(1, 1), Some(d(6, 1)))));
        assert!(!is_available(&occ, &period(d(5, 1), Some(d(7, 1)))));
    }

    #[test]
    fn test_count_never_exceeds_unclaimed_units() {
        let want = period(d(3, 1), Some(d(4, 1)));
        let units = vec![
            unit(1, "A1"),
            with_order(unit(2, "A2"), period(d(2, 1), Some(d(3, 2)))),
            with_contract(unit(3, "A3"), period(d(1, 1), None)),
            with_block(unit(4, "A4"), period(d(3, 31), Some(d(4, 2)))),
            with_order(unit(5, "A5"), period(d(4, 1), None)),
        ];
        assert_eq!(count_available(&units, &want), 2);
        assert!(count_available(&units, &want) <= units.len());
    }

    #[test]
    fn test_first_available_prefers_lowest_number() {
        let want = period(d(3, 1), Some(d(4, 1)));
        let units = vec![
            unit(9, "B1"),
            with_order(unit(1, "A1"), want),
            unit(7, "A2"),
            unit(3, "A2"),
        ];
        let chosen = first_available(&units, &want).unwrap();
        assert_eq!(chosen.id, StorageId::new(3));
        assert!(first_available(&units[1..2], &want).is_none());
    }

    #[test]
    fn test_first_available_orders_numbers_naturally() {
        let want = period(d(3, 1), Some(d(4, 1)));
        let units = vec![unit(1, "A10"), unit(2, "B1"), unit(3, "A2")];
        assert_eq!(first_available(&units, &want).unwrap().id, StorageId::new(3));
    }

    #[test]
    fn test_compare_numbers() {
        assert_eq!(compare_numbers("A2", "A10"), Ordering::Less);
        assert_eq!(compare_numbers("A10", "B1"), Ordering::Less);
        assert_eq!(compare_numbers("9", "10"), Ordering::Less);
        assert_eq!(compare_numbers("A", "A1"), Ordering::Less);
        assert_eq!(compare_numbers("A02", "A2"), Ordering::Less);
        assert_eq!(compare_numbers("A2", "A2"), Ordering::Equal);
        assert_eq!(
            compare_numbers("A99999999999999999999999", "A100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn test_derive_status_precedence() {
        let today = d(5, 10);
        let everything = with_block(
            with_contract(
                with_order(unit(1, "A1"), period(d(5, 1), None)),
                period(d(5, 1), None),
            ),
            period(d(5, 10), Some(d(5, 11))),
        );
        assert_eq!(
            derive_status(&everything, today),
            StorageStatus::ManuallyUnavailable
        );

        let contract = with_contract(
            with_order(unit(1, "A1"), period(d(5, 1), None)),
            period(d(5, 1), None),
        );
        assert_eq!(derive_status(&contract, today), StorageStatus::Occupied);

        let reserved = with_order(unit(1, "A1"), period(d(5, 1), Some(d(6, 1))));
        assert_eq!(derive_status(&reserved, today), StorageStatus::Reserved);

        let future = with_order(unit(1, "A1"), period(d(7, 1), Some(d(8, 1))));
        assert_eq!(derive_status(&future, today), StorageStatus::Available);
    }

    #[test]
    fn test_has_claims_after() {
        let past = with_contract(unit(1, "A1"), period(d(1, 1), Some(d(2, 1))));
        let open = with_order(unit(2, "A2"), period(d(1, 1), None));
        assert!(!has_claims_after(&past, d(3, 1)));
        assert!(has_claims_after(&open, d(3, 1)));
        assert!(!has_claims_after(&unit(3, "A3"), d(3, 1)));
    }
}
