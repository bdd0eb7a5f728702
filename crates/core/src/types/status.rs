//! Status enums for rental entities.
//!
//! The string forms (`Display` / `FromStr`) match the Postgres enum labels so
//! CLI arguments, logs and the database all spell a status the same way.

use serde::{Deserialize, Serialize};

/// Order lifecycle status.
///
/// ```text
/// Created -> Reserved -> AwaitingPayment -> Paid -> Completed
///    \_________\_____________\_____________\____-> Cancelled | Expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "rental.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Created,
    Reserved,
    AwaitingPayment,
    Paid,
    Completed,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Terminal states accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Whether an order in this state holds its storage unit.
    ///
    /// Completed orders hand the claim over to their contract.
    #[must_use]
    pub const fn claims_storage(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the hourly sweep may expire an order in this state.
    #[must_use]
    pub const fn is_expirable(self) -> bool {
        matches!(self, Self::Reserved | Self::AwaitingPayment)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Created, Self::Reserved)
            | (Self::Reserved, Self::AwaitingPayment)
            | (Self::AwaitingPayment, Self::Paid)
            | (Self::Paid, Self::Completed) => true,
            (from, Self::Cancelled | Self::Expired) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Database / display label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Reserved => "reserved",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cached occupancy status of a storage unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "rental.storage_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum StorageStatus {
    #[default]
    Available,
    Reserved,
    Occupied,
    ManuallyUnavailable,
}

impl std::fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Reserved => write!(f, "reserved"),
            Self::Occupied => write!(f, "occupied"),
            Self::ManuallyUnavailable => write!(f, "manually_unavailable"),
        }
    }
}

/// Whether a rental has a fixed end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "rental.rental_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum RentalType {
    /// Fixed end date, paid up front.
    Limited,
    /// Open-ended, charged through gateway recurrences.
    Unlimited,
}

impl std::fmt::Display for RentalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limited => write!(f, "limited"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl std::str::FromStr for RentalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "limited" => Ok(Self::Limited),
            "unlimited" => Ok(Self::Unlimited),
            _ => Err(format!("invalid rental type: {s}")),
        }
    }
}

/// How often an unlimited rental is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "rental.payment_frequency", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentFrequency {
    #[default]
    Monthly,
    Yearly,
}

impl PaymentFrequency {
    /// Number of months one billing period covers.
    #[must_use]
    pub const fn months(self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Yearly => 12,
        }
    }
}

impl std::fmt::Display for PaymentFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monthly => write!(f, "monthly"),
            Self::Yearly => write!(f, "yearly"),
        }
    }
}

impl std::str::FromStr for PaymentFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(format!("invalid payment frequency: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 7] = [
        OrderStatus::Created,
        OrderStatus::Reserved,
        OrderStatus::AwaitingPayment,
        OrderStatus::Paid,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Expired,
    ];

    #[test]
    fn test_happy_path_transitions() {
        assert!(OrderStatus::Created.can_transition_to(OrderStatus::Reserved));
        assert!(OrderStatus::Reserved.can_transition_to(OrderStatus::AwaitingPayment));
        assert!(OrderStatus::AwaitingPayment.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Completed));
    }

    #[test]
    fn test_no_skipping_states() {
        assert!(!OrderStatus::Created.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Reserved.can_transition_to(OrderStatus::Completed));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::AwaitingPayment));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_failure_exits_from_every_open_state() {
        for from in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(from.can_transition_to(OrderStatus::Cancelled));
            assert!(from.can_transition_to(OrderStatus::Expired));
        }
    }

    #[test]
    fn test_expirable_states() {
        let expirable: Vec<_> = ALL.into_iter().filter(|s| s.is_expirable()).collect();
        assert_eq!(
            expirable,
            vec![OrderStatus::Reserved, OrderStatus::AwaitingPayment]
        );
    }

    #[test]
    fn test_frequency_round_trip() {
        for freq in [PaymentFrequency::Monthly, PaymentFrequency::Yearly] {
            assert_eq!(freq.to_string().parse::<PaymentFrequency>(), Ok(freq));
        }
        assert_eq!(PaymentFrequency::Yearly.months(), 12);
    }
}
