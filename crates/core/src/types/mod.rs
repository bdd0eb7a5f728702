//! Core value types for boxrent.
//!
//! This module provides type-safe wrappers for ids, money, statuses and
//! date ranges.

pub mod id;
pub mod money;
pub mod period;
pub mod status;

pub use id::*;
pub use money::{CommissionRate, CurrencyCode, Money};
pub use period::{BillingPeriod, RentalPeriod};
pub use status::*;
