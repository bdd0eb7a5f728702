//! Boxrent service library.
//!
//! Rental lifecycle, GoPay billing and self-billing on top of
//! `boxrent-core`. The webhook server (`boxrent-server`) and the batch CLI
//! both build a [`services::ServiceContext`] and call into the services
//! here, so every batch job is also reachable from tests without a process
//! boundary.
//!
//! # Modules
//!
//! - [`config`] - Environment configuration
//! - [`db`] - `PostgreSQL` repositories
//! - [`memory`] - In-memory repositories with the same semantics
//! - [`repository`] - Repository traits the services depend on
//! - [`gopay`] - GoPay REST client behind [`gopay::PaymentGateway`]
//! - [`events`] - Post-commit event dispatch with an outbox fallback
//! - [`services`] - Business operations and batch jobs
//! - [`routes`] - Webhook and health endpoints

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod gopay;
pub mod memory;
pub mod repository;
pub mod routes;
pub mod services;
pub mod state;
