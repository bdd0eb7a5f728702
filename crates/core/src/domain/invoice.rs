//! Self-billing invoices issued on behalf of landlords.
//!
//! The platform invoices itself in the landlord's name for the landlord's
//! share of each month's rental payments. Numbers are sequential per
//! landlord and never reused.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::payment::BillablePayment;
use super::user::User;
use crate::error::DomainError;
use crate::types::{BillingPeriod, InvoiceId, Money, PaymentId, UserId};

/// Shape of generated invoice numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceNumberFormat {
    /// `{prefix}-{year}-{seq:04}`
    #[default]
    WithYear,
    /// `{prefix}-{seq:04}`
    Plain,
}

impl InvoiceNumberFormat {
    /// Render the invoice number for `sequence`.
    #[must_use]
    pub fn render(self, prefix: &str, year: i32, sequence: i32) -> String {
        match self {
            Self::WithYear => format!("{prefix}-{year}-{sequence:04}"),
            Self::Plain => format!("{prefix}-{sequence:04}"),
        }
    }
}

impl std::str::FromStr for InvoiceNumberFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "year" | "with_year" => Ok(Self::WithYear),
            "plain" => Ok(Self::Plain),
            _ => Err(format!("invalid invoice number format: {s}")),
        }
    }
}

/// A persisted self-billing invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfBillingInvoice {
    pub id: InvoiceId,
    pub landlord_id: UserId,
    pub period: BillingPeriod,
    pub gross_amount: Money,
    pub net_amount: Money,
    pub sequence: i32,
    pub number: String,
    pub created_at: DateTime<Utc>,
}

/// Invoice totals computed from a landlord's unbilled payments.
///
/// The sequence number is assigned by the repository inside the insert
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceDraft {
    pub landlord_id: UserId,
    pub period: BillingPeriod,
    pub prefix: String,
    pub format: InvoiceNumberFormat,
    pub gross_amount: Money,
    pub net_amount: Money,
    pub payment_ids: Vec<PaymentId>,
    pub created_at: DateTime<Utc>,
}

impl InvoiceDraft {
    /// Sum gross and net amounts for `payments`.
    ///
    /// Each payment's landlord share uses its storage's override rate when
    /// set, else the landlord's default; the total is rounded once.
    ///
    /// Returns `Ok(None)` when there is nothing to bill.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AmountOutOfRange` if the net total overflows.
    pub fn compute(
        landlord: &User,
        prefix: &str,
        period: BillingPeriod,
        format: InvoiceNumberFormat,
        payments: &[BillablePayment],
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, DomainError> {
        if payments.is_empty() {
            return Ok(None);
        }

        let gross_amount: Money = payments.iter().map(|p| p.amount).sum();
        let net_exact: Decimal = payments
            .iter()
            .map(|p| {
                p.amount
                    .share(p.storage_commission_rate.unwrap_or(landlord.commission_rate))
            })
            .sum();

        Ok(Some(Self {
            landlord_id: landlord.id,
            period,
            prefix: prefix.to_owned(),
            format,
            gross_amount,
            net_amount: Money::round(net_exact)?,
            payment_ids: payments.iter().map(|p| p.payment_id).collect(),
            created_at: now,
        }))
    }

    /// Number this draft gets with `sequence`.
    #[must_use]
    pub fn number_for(&self, sequence: i32) -> String {
        self.format.render(&self.prefix, self.period.year(), sequence)
    }

    #[must_use]
    pub fn into_invoice(self, id: InvoiceId, sequence: i32) -> SelfBillingInvoice {
        SelfBillingInvoice {
            id,
            landlord_id: self.landlord_id,
            period: self.period,
            gross_amount: self.gross_amount,
            net_amount: self.net_amount,
            sequence,
            number: self.number_for(sequence),
            created_at: self.created_at,
        }
    }
}
