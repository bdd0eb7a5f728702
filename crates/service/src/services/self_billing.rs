//! Monthly self-billing invoices issued on behalf of landlords.

use tracing::instrument;

use boxrent_core::domain::{InvoiceDraft, SelfBillingInvoice};
use boxrent_core::{BillingPeriod, DomainEvent, UserId};

use super::{BatchReport, ServiceContext};
use crate::error::{AppError, Result};
use crate::events::EventBuffer;
use crate::repository::InvoiceCreation;

/// Result of generating one landlord's invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceOutcome {
    Created(SelfBillingInvoice),
    /// The landlord was already invoiced for the period.
    Exists(SelfBillingInvoice),
}

impl InvoiceOutcome {
    #[must_use]
    pub const fn invoice(&self) -> &SelfBillingInvoice {
        match self {
            Self::Created(invoice) | Self::Exists(invoice) => invoice,
        }
    }
}

/// Service generating self-billing invoices.
pub struct SelfBillingService {
    ctx: ServiceContext,
}

impl SelfBillingService {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Invoice one landlord's unbilled payments for `period`.
    ///
    /// Running it again for the same landlord and period returns the
    /// existing invoice.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` for an unknown landlord
    /// - `AppError::SelfBillingNotConfigured` without a prefix
    /// - `AppError::NoPaymentsForPeriod` when there is nothing to bill
    #[instrument(skip(self), fields(landlord_id = %landlord_id, period = %period))]
    pub async fn generate(
        &self,
        landlord_id: UserId,
        period: BillingPeriod,
    ) -> Result<InvoiceOutcome> {
        let landlord = self
            .ctx
            .repos
            .users
            .get(landlord_id)
            .await?
            .filter(|user| user.is_landlord)
            .ok_or_else(|| AppError::NotFound(format!("landlord {landlord_id}")))?;
        let prefix = landlord
            .self_billing_prefix()
            .ok_or(AppError::SelfBillingNotConfigured(landlord_id))?;

        if let Some(existing) = self.ctx.repos.invoices.find(landlord_id, period).await? {
            return Ok(InvoiceOutcome::Exists(existing));
        }

        let payments = self
            .ctx
            .repos
            .payments
            .unbilled_for_landlord(landlord_id, period)
            .await?;
        let draft = InvoiceDraft::compute(
            &landlord,
            prefix,
            period,
            self.ctx.settings.invoice_format,
            &payments,
            self.ctx.clock.now(),
        )?
        .ok_or(AppError::NoPaymentsForPeriod {
            landlord: landlord_id,
            period,
        })?;

        match self.ctx.repos.invoices.create(draft).await? {
            InvoiceCreation::Created(invoice) => {
                let mut events = EventBuffer::new();
                events.push(DomainEvent::SelfBillingInvoiceGenerated {
                    invoice_id: invoice.id,
                    landlord_id,
                    number: invoice.number.clone(),
                });
                self.ctx.events.publish(events).await;
                tracing::info!(
                    number = %invoice.number,
                    gross = %invoice.gross_amount,
                    net = %invoice.net_amount,
                    payments = payments.len(),
                    "Self-billing invoice created"
                );
                Ok(InvoiceOutcome::Created(invoice))
            }
            InvoiceCreation::Exists(invoice) => Ok(InvoiceOutcome::Exists(invoice)),
        }
    }

    /// Invoice every landlord for `period`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the landlords cannot be listed.
    #[instrument(skip(self), fields(period = %period))]
    pub async fn generate_all(&self, period: BillingPeriod) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for landlord in self.ctx.repos.users.list_landlords().await? {
            let id = landlord.id;
            match self.generate(id, period).await {
                Ok(InvoiceOutcome::Created(invoice)) => report.success(format!(
                    "[NEW] {} landlord {id}: gross {}, net {}",
                    invoice.number, invoice.gross_amount, invoice.net_amount
                )),
                Ok(InvoiceOutcome::Exists(invoice)) => {
                    report.skip(format!("[EXISTS] {} landlord {id}", invoice.number));
                }
                Err(e) if e.is_skip() => report.skip(format!("[SKIP] landlord {id}: {e}")),
                Err(e) => {
                    tracing::error!(landlord_id = %id, error = %e, "Self-billing failed");
                    report.failure(format!("[ERROR] landlord {id}: {e}"));
                }
            }
        }

        Ok(report)
    }
}
