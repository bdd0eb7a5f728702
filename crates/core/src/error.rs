//! Domain rule violations.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{ContractId, OrderStatus};

/// Errors raised when an operation would break a domain invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The order cannot move from its current state to the requested one.
    #[error("invalid order transition: cannot {action} an order in state {from}")]
    InvalidTransition {
        /// Current status.
        from: OrderStatus,
        /// Transition that was attempted.
        action: &'static str,
    },

    /// Rental dates are inconsistent with the rental type.
    #[error("invalid rental period: {0}")]
    InvalidPeriod(String),

    /// Commission rate outside `[0, 1]`.
    #[error("invalid commission rate: {0} (must be between 0 and 1)")]
    InvalidCommissionRate(Decimal),

    /// Year/month pair is not a calendar month.
    #[error("invalid billing period: {year}-{month}")]
    InvalidBillingPeriod { year: i32, month: u32 },

    /// Computed amount does not fit the money representation.
    #[error("amount out of range: {0}")]
    AmountOutOfRange(String),

    /// Contract was already terminated.
    #[error("contract {0} is already terminated")]
    AlreadyTerminated(ContractId),

    /// Only open-ended contracts can be terminated by their owner.
    #[error("contract {0} has a fixed end date and cannot be terminated")]
    NotTerminable(ContractId),

    /// The contract has no active gateway recurrence to charge.
    #[error("contract {0} is not set up for recurring charges")]
    NotRecurring(ContractId),
}
