//! Boxrent Core - Domain types and rules.
//!
//! This crate provides the rental domain shared by the `service` library,
//! the webhook server and the batch CLI:
//! - ids, money, statuses and date ranges
//! - entities with their transitions (orders, contracts, payments, invoices)
//! - pure rules: availability, pricing, access decisions
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! database access, no HTTP clients. Persistence and the payment gateway live
//! in `boxrent-service` behind traits.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, [`Money`], statuses, periods
//! - [`domain`] - Entities and their invariants
//! - [`availability`] - Which units are free for a period
//! - [`pricing`] - Checkout price quotes
//! - [`access`] - Actor/action/subject decisions
//! - [`events`] - Domain events
//! - [`clock`] - Injectable time source

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod access;
pub mod availability;
pub mod clock;
pub mod domain;
pub mod error;
pub mod events;
pub mod pricing;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::DomainError;
pub use events::{DomainEvent, EventEnvelope};
pub use types::*;
