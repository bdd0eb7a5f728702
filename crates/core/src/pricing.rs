//! Rental price quotes.

use crate::domain::StorageType;
use crate::types::{Money, PaymentFrequency, RentalPeriod, RentalType};

/// Price charged at checkout.
///
/// Limited rentals pay every started month up front. Unlimited rentals pay
/// one billing period, which is also what each recurrence charges.
#[must_use]
pub fn quote(
    storage_type: &StorageType,
    rental_type: RentalType,
    frequency: PaymentFrequency,
    period: &RentalPeriod,
) -> Money {
    match rental_type {
        RentalType::Limited => storage_type
            .price_per_month
            .times(period.started_months().unwrap_or(1)),
        RentalType::Unlimited => storage_type.price_per_month.times(frequency.months()),
    }
}
