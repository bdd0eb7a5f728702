//! GoPay request and response types.

use boxrent_core::{CurrencyCode, GatewayPaymentId, Money};
use serde::{Deserialize, Serialize};

/// Payment states reported by GoPay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoPayPaymentStatus {
    Created,
    PaymentMethodChosen,
    Paid,
    Authorized,
    Canceled,
    Timeouted,
    Refunded,
    PartiallyRefunded,
    /// A state this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl GoPayPaymentStatus {
    #[must_use]
    pub const fn is_paid(self) -> bool {
        matches!(self, Self::Paid)
    }

    /// The payment can no longer be paid.
    #[must_use]
    pub const fn is_failed(self) -> bool {
        matches!(self, Self::Canceled | Self::Timeouted)
    }
}

/// A payment as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoPayPayment {
    pub id: GatewayPaymentId,
    pub status: GoPayPaymentStatus,
    /// Payment page the customer is redirected to.
    pub gateway_url: Option<String>,
    /// Set on recurrences.
    pub parent_id: Option<GatewayPaymentId>,
    pub amount: Option<Money>,
}

/// A payment the customer completes on the gateway's page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_number: String,
    pub description: String,
    pub amount: Money,
    pub currency: CurrencyCode,
    pub return_url: String,
    pub notification_url: String,
}

/// A charge against an authorized recurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceCharge {
    pub order_number: String,
    pub description: String,
    pub amount: Money,
    pub currency: CurrencyCode,
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
pub(super) struct Target {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub goid: i64,
}

#[derive(Debug, Serialize)]
pub(super) struct Payer {
    pub allowed_payment_instruments: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub(super) struct Item<'a> {
    pub name: &'a str,
    pub amount: i64,
    pub count: u32,
}

#[derive(Debug, Serialize)]
pub(super) struct Callback<'a> {
    pub return_url: &'a str,
    pub notification_url: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct Recurrence {
    pub recurrence_cycle: &'static str,
    pub recurrence_date_to: &'static str,
}

/// Body of `POST payments/payment`.
#[derive(Debug, Serialize)]
pub(super) struct CreatePaymentBody<'a> {
    pub payer: Payer,
    pub target: Target,
    pub amount: i64,
    pub currency: &'static str,
    pub order_number: &'a str,
    pub order_description: &'a str,
    pub items: Vec<Item<'a>>,
    pub callback: Callback<'a>,
    pub lang: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
}

/// Body of `POST payments/payment/{id}/create-recurrence`.
#[derive(Debug, Serialize)]
pub(super) struct CreateRecurrenceBody<'a> {
    pub amount: i64,
    pub currency: &'static str,
    pub order_number: &'a str,
    pub order_description: &'a str,
    pub items: Vec<Item<'a>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PaymentResponse {
    pub id: i64,
    pub state: GoPayPaymentStatus,
    #[serde(default)]
    pub gw_url: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub amount: Option<i64>,
}

impl From<PaymentResponse> for GoPayPayment {
    fn from(response: PaymentResponse) -> Self {
        Self {
            id: GatewayPaymentId::new(response.id),
            status: response.state,
            gateway_url: response.gw_url,
            parent_id: response.parent_id.map(GatewayPaymentId::new),
            amount: response.amount.map(Money::from_minor),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    /// Token lifetime in seconds.
    pub expires_in: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_response_deserialization() {
        let json = r#"{
            "id": 3000006529,
            "order_number": "order-17",
            "state": "CREATED",
            "amount": 99000,
            "currency": "CZK",
            "lang": "CS",
            "gw_url": "https://gw.sandbox.gopay.com/gw/v3/bCcvmwTKK5hrJx2aGG8ZnFyBJhAvF"
        }"#;

        let payment: GoPayPayment = serde_json::from_str::<PaymentResponse>(json)
            .unwrap()
            .into();
        assert_eq!(payment.id, GatewayPaymentId::new(3_000_006_529));
        assert_eq!(payment.status, GoPayPaymentStatus::Created);
        assert_eq!(payment.amount, Some(Money::from_minor(99_000)));
        assert!(payment.gateway_url.unwrap().contains("/gw/v3/"));
        assert_eq!(payment.parent_id, None);
    }

    #[test]
    fn test_unknown_state_does_not_fail() {
        let response: PaymentResponse =
            serde_json::from_str(r#"{"id": 1, "state": "SOMETHING_NEW"}"#).unwrap();
        assert_eq!(response.state, GoPayPaymentStatus::Unknown);
    }

    #[test]
    fn test_state_classification() {
        assert!(GoPayPaymentStatus::Paid.is_paid());
        assert!(GoPayPaymentStatus::Timeouted.is_failed());
        assert!(GoPayPaymentStatus::Canceled.is_failed());
        assert!(!GoPayPaymentStatus::PaymentMethodChosen.is_failed());
        assert!(!GoPayPaymentStatus::PaymentMethodChosen.is_paid());
    }

    #[test]
    fn test_recurring_body_shape() {
        let body = CreatePaymentBody {
            payer: Payer {
                allowed_payment_instruments: &["PAYMENT_CARD"],
            },
            target: Target {
                kind: "ACCOUNT",
                goid: 8_123_456_789,
            },
            amount: 99_000,
            currency: "CZK",
            order_number: "order-3",
            order_description: "Storage A1",
            items: vec![Item {
                name: "Storage A1",
                amount: 99_000,
                count: 1,
            }],
            callback: Callback {
                return_url: "https://boxrent.cz/orders/3/payment-return",
                notification_url: "https://boxrent.cz/webhooks/gopay",
            },
            lang: "CS",
            recurrence: Some(Recurrence {
                recurrence_cycle: "ON_DEMAND",
                recurrence_date_to: "2099-12-31",
            }),
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["target"]["type"], "ACCOUNT");
        assert_eq!(value["recurrence"]["recurrence_cycle"], "ON_DEMAND");
        assert_eq!(value["callback"]["notification_url"], "https://boxrent.cz/webhooks/gopay");
    }
}
