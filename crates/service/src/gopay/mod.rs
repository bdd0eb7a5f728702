//! GoPay payment gateway integration.
//!
//! # Architecture
//!
//! - OAuth2 client-credentials token, cached until shortly before expiry
//! - JSON REST calls against `{gateway_url}payments/...`
//! - Unlimited rentals use an `ON_DEMAND` recurrence: the checkout payment
//!   becomes the parent and every later charge is a recurrence of it
//!
//! Services depend on the [`PaymentGateway`] trait so tests can script the
//! gateway's answers.

pub mod client;
pub mod types;

pub use client::GoPayClient;
pub use types::{GoPayPayment, GoPayPaymentStatus, PaymentRequest, RecurrenceCharge};

use async_trait::async_trait;
use boxrent_core::GatewayPaymentId;
use thiserror::Error;

/// Errors that can occur when interacting with the GoPay API.
#[derive(Debug, Error)]
pub enum GoPayError {
    /// GoPay answered with a non-success HTTP status.
    #[error("GoPay API error (HTTP {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body as returned by GoPay.
        body: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("GoPay request timed out")]
    Timeout,

    /// Connection or protocol failure before a response arrived.
    #[error("GoPay transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape.
    #[error("invalid GoPay response: {0}")]
    InvalidResponse(String),

    /// Token endpoint rejected the client credentials.
    #[error("GoPay authentication failed: {0}")]
    Authentication(String),
}

impl GoPayError {
    /// HTTP status of an API error response.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure says nothing about the customer's payment method
    /// (outage, timeout, network).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidResponse(_) | Self::Authentication(_) => false,
        }
    }
}

impl From<reqwest::Error> for GoPayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Operations the rental core needs from the payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// One-off payment for a limited rental.
    async fn create_payment(&self, request: &PaymentRequest) -> Result<GoPayPayment, GoPayError>;

    /// Initial payment that authorizes on-demand recurrences.
    async fn create_recurring_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<GoPayPayment, GoPayError>;

    /// Charge a recurrence against `parent`.
    async fn create_recurrence(
        &self,
        parent: GatewayPaymentId,
        charge: &RecurrenceCharge,
    ) -> Result<GoPayPayment, GoPayError>;

    /// Cancel the recurrence so `parent` can no longer be charged.
    async fn void_recurrence(&self, parent: GatewayPaymentId) -> Result<(), GoPayError>;

    async fn get_status(&self, id: GatewayPaymentId) -> Result<GoPayPayment, GoPayError>;
}
