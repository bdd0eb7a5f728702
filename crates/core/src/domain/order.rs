//! Orders and their lifecycle transitions.
//!
//! An order is the customer's checkout for one storage unit. It holds the
//! unit from reservation until it either completes into a contract or drops
//! out as cancelled/expired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::storage::{Claim, ClaimSource};
use crate::error::DomainError;
use crate::types::{
    GatewayPaymentId, Money, OrderId, OrderStatus, PaymentFrequency, PlaceId, RentalPeriod,
    RentalType, StorageId, StorageTypeId, UserId,
};

/// Customer's signature captured at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSignature {
    pub signer_name: String,
    pub signed_at: DateTime<Utc>,
    /// Storage key of the signature image.
    pub image_ref: String,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub storage_id: StorageId,
    pub rental_type: RentalType,
    pub payment_frequency: PaymentFrequency,
    pub period: RentalPeriod,
    pub total_price: Money,
    pub status: OrderStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub gateway_payment_id: Option<GatewayPaymentId>,
    pub gateway_parent_payment_id: Option<GatewayPaymentId>,
    pub signature: Option<OrderSignature>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped on every save.
    pub version: i32,
}

/// Checkout data for an order that still needs a storage unit.
///
/// Repositories insert it already reserved: picking the unit and holding it
/// happen in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub storage_type_id: StorageTypeId,
    pub place_id: Option<PlaceId>,
    pub rental_type: RentalType,
    pub payment_frequency: PaymentFrequency,
    pub period: RentalPeriod,
    pub total_price: Money,
    pub expires_at: DateTime<Utc>,
    pub signature: Option<OrderSignature>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Materialize the reserved order once a unit and id are known.
    #[must_use]
    pub fn into_reserved(self, id: OrderId, storage_id: StorageId) -> Order {
        Order {
            id,
            user_id: self.user_id,
            storage_id,
            rental_type: self.rental_type,
            payment_frequency: self.payment_frequency,
            period: self.period,
            total_price: self.total_price,
            status: OrderStatus::Reserved,
            expires_at: Some(self.expires_at),
            gateway_payment_id: None,
            gateway_parent_payment_id: None,
            signature: self.signature,
            created_at: self.created_at,
            updated_at: self.created_at,
            version: 0,
        }
    }
}

impl Order {
    /// Hold the unit until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` unless the order is `Created`.
    pub fn reserve(
        &mut self,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition(OrderStatus::Reserved, "reserve", now)?;
        self.expires_at = Some(expires_at);
        Ok(())
    }

    /// Record the gateway payment the customer was redirected to.
    ///
    /// For recurring payments the same id becomes the parent of every later
    /// recurrence.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` unless the order is `Reserved`.
    pub fn begin_payment(
        &mut self,
        payment_id: GatewayPaymentId,
        recurring: bool,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition(OrderStatus::AwaitingPayment, "begin payment for", now)?;
        self.gateway_payment_id = Some(payment_id);
        if recurring {
            self.gateway_parent_payment_id = Some(payment_id);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` unless the order is awaiting payment.
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(OrderStatus::Paid, "mark paid", now)?;
        self.expires_at = None;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` unless the order is `Paid`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(OrderStatus::Completed, "complete", now)
    }

    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` if the order is already terminal.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(OrderStatus::Cancelled, "cancel", now)
    }

    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` if the order is already terminal.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(OrderStatus::Expired, "expire", now)
    }

    /// Whether the hourly sweep should expire this order at `now`.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_expirable() && self.expires_at.is_some_and(|at| at < now)
    }

    /// The claim this order holds on its unit, if it still holds one.
    #[must_use]
    pub fn claim(&self) -> Option<Claim> {
        self.status.claims_storage().then_some(Claim {
            source: ClaimSource::Order(self.id),
            period: self.period,
        })
    }

    fn transition(
        &mut self,
        next: OrderStatus,
        action: &'static str,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                action,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
