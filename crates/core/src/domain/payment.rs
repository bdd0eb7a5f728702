//! Received payments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CommissionRate, ContractId, GatewayPaymentId, InvoiceId, Money, OrderId, PaymentId, StorageId,
};

/// What a payment was collected for: the initial checkout of an order, or a
/// recurring charge on a contract. Never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PaymentLink {
    Order(OrderId),
    Contract(ContractId),
}

impl PaymentLink {
    /// `(order_id, contract_id)` column pair for persistence.
    #[must_use]
    pub const fn columns(&self) -> (Option<OrderId>, Option<ContractId>) {
        match *self {
            Self::Order(id) => (Some(id), None),
            Self::Contract(id) => (None, Some(id)),
        }
    }

    /// Rebuild from the `(order_id, contract_id)` column pair.
    ///
    /// Returns `None` unless exactly one side is set.
    #[must_use]
    pub const fn from_columns(
        order_id: Option<OrderId>,
        contract_id: Option<ContractId>,
    ) -> Option<Self> {
        match (order_id, contract_id) {
            (Some(id), None) => Some(Self::Order(id)),
            (None, Some(id)) => Some(Self::Contract(id)),
            _ => None,
        }
    }
}

/// A persisted payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub link: PaymentLink,
    pub gateway_payment_id: Option<GatewayPaymentId>,
    /// Set once the payment is included in a self-billing invoice.
    pub invoice_id: Option<InvoiceId>,
}

/// A payment about to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub link: PaymentLink,
    pub gateway_payment_id: Option<GatewayPaymentId>,
}

impl NewPayment {
    #[must_use]
    pub fn into_payment(self, id: PaymentId) -> Payment {
        Payment {
            id,
            amount: self.amount,
            paid_at: self.paid_at,
            link: self.link,
            gateway_payment_id: self.gateway_payment_id,
            invoice_id: None,
        }
    }
}

/// An unbilled payment joined with the commission data of its storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillablePayment {
    pub payment_id: PaymentId,
    pub amount: Money,
    pub storage_id: StorageId,
    pub storage_commission_rate: Option<CommissionRate>,
}
