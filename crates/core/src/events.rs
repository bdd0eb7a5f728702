//! Domain events raised by committed state changes.
//!
//! Events are buffered while a command runs and dispatched only after its
//! writes commit, so consumers never observe a rolled-back change.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    ContractId, GatewayPaymentId, InvoiceId, Money, OrderId, PaymentId, StorageId, UserId,
};

/// Something that happened in the rental domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderReserved {
        order_id: OrderId,
        storage_id: StorageId,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    },
    OrderPaymentStarted {
        order_id: OrderId,
        gateway_payment_id: GatewayPaymentId,
    },
    OrderCancelled {
        order_id: OrderId,
        storage_id: StorageId,
    },
    OrderExpired {
        order_id: OrderId,
        storage_id: StorageId,
    },
    OrderCompleted {
        order_id: OrderId,
        contract_id: ContractId,
        payment_id: PaymentId,
    },
    /// The gateway reported a payment for an order that had already closed;
    /// the money must be refunded by hand.
    PaymentAfterClosure {
        order_id: OrderId,
        gateway_payment_id: GatewayPaymentId,
    },
    RecurringChargeSucceeded {
        contract_id: ContractId,
        payment_id: PaymentId,
        amount: Money,
        next_billing_date: NaiveDate,
    },
    RecurringChargeFailed {
        contract_id: ContractId,
        attempt: u8,
        reason: String,
    },
    RecurringPaymentCancelled {
        contract_id: ContractId,
        reason: String,
    },
    ContractTerminated {
        contract_id: ContractId,
        end_date: NaiveDate,
    },
    ContractExpiringSoon {
        contract_id: ContractId,
        user_id: UserId,
        end_date: NaiveDate,
        days_left: i64,
    },
    SelfBillingInvoiceGenerated {
        invoice_id: InvoiceId,
        landlord_id: UserId,
        number: String,
    },
}

impl DomainEvent {
    /// Short event name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::OrderReserved { .. } => "order_reserved",
            Self::OrderPaymentStarted { .. } => "order_payment_started",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::OrderExpired { .. } => "order_expired",
            Self::OrderCompleted { .. } => "order_completed",
            Self::PaymentAfterClosure { .. } => "payment_after_closure",
            Self::RecurringChargeSucceeded { .. } => "recurring_charge_succeeded",
            Self::RecurringChargeFailed { .. } => "recurring_charge_failed",
            Self::RecurringPaymentCancelled { .. } => "recurring_payment_cancelled",
            Self::ContractTerminated { .. } => "contract_terminated",
            Self::ContractExpiringSoon { .. } => "contract_expiring_soon",
            Self::SelfBillingInvoiceGenerated { .. } => "self_billing_invoice_generated",
        }
    }
}

/// An event with its identity and timestamp; the id lets consumers drop
/// duplicates delivered by the outbox retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event: DomainEvent,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(event: DomainEvent, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at,
            event,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = DomainEvent::OrderExpired {
            order_id: OrderId::new(4),
            storage_id: StorageId::new(2),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_expired");
        assert_eq!(json["order_id"], 4);
        assert_eq!(event.name(), "order_expired");
    }

    #[test]
    fn test_envelope_survives_storage() {
        let envelope = EventEnvelope::new(
            DomainEvent::ContractTerminated {
                contract_id: ContractId::new(1),
                end_date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            },
            Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
        );
        let stored = serde_json::to_string(&envelope).unwrap();
        let restored: EventEnvelope = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, envelope);
    }
}
