//! Recurring charges for open-ended contracts.
//!
//! A contract is charged on its next billing date. A failed charge is
//! retried once after `retry_after`; the second failure voids the GoPay
//! recurrence and stops billing for good.

use std::fmt;
use std::str::FromStr;

use tracing::instrument;

use boxrent_core::domain::{BillingStrike, Contract, NewPayment, PaymentLink};
use boxrent_core::{DomainEvent, GatewayPaymentId, Money};

use super::{BatchReport, ServiceContext};
use crate::error::Result;
use crate::events::EventBuffer;
use crate::gopay::{GoPayError, RecurrenceCharge};

/// How gateway timeouts and outages count against a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransientFailurePolicy {
    /// Every failed charge is a strike.
    #[default]
    Count,
    /// Transient failures leave the contract untouched for the next run.
    Skip,
}

impl fmt::Display for TransientFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "count",
            Self::Skip => "skip",
        })
    }
}

impl FromStr for TransientFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "skip" => Ok(Self::Skip),
            other => Err(format!("expected `count` or `skip`, got `{other}`")),
        }
    }
}

/// Why a charge did not go through.
enum ChargeFailure {
    Declined(String),
    Transient(GoPayError),
}

/// Service charging recurring contracts.
pub struct RecurringBillingService {
    ctx: ServiceContext,
}

impl RecurringBillingService {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Charge every contract whose billing date has come.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the due contracts cannot be listed.
    #[instrument(skip(self))]
    pub async fn process_due(&self) -> Result<BatchReport> {
        let today = self.ctx.clock.today();
        let contracts = self.ctx.repos.contracts.find_due_for_billing(today).await?;
        tracing::info!(count = contracts.len(), %today, "Processing due recurring charges");
        Ok(self.charge_all(contracts).await)
    }

    /// Retry contracts whose first charge failed at least `retry_after` ago.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the contracts cannot be listed.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self) -> Result<BatchReport> {
        let failed_before = self.ctx.clock.now() - self.ctx.settings.retry_after;
        let contracts = self
            .ctx
            .repos
            .contracts
            .find_needing_retry(failed_before)
            .await?;
        tracing::info!(count = contracts.len(), "Retrying failed recurring charges");
        Ok(self.charge_all(contracts).await)
    }

    async fn charge_all(&self, contracts: Vec<Contract>) -> BatchReport {
        let mut report = BatchReport::default();
        for contract in contracts {
            self.charge(contract, &mut report).await;
        }
        tracing::info!(
            charged = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "Recurring charges processed"
        );
        report
    }

    #[instrument(skip(self, contract, report), fields(contract_id = %contract.id))]
    async fn charge(&self, contract: Contract, report: &mut BatchReport) {
        let id = contract.id;
        let Some(billing) = contract.active_recurring().cloned() else {
            report.skip(format!("[SKIP] contract {id}: recurring billing is off"));
            return;
        };

        let charge = RecurrenceCharge {
            order_number: format!("C{id}-{}", billing.next_billing_date.format("%Y%m%d")),
            description: format!("Storage rental, contract {id}"),
            amount: billing.amount,
            currency: self.ctx.settings.currency,
        };

        let failure = match self
            .ctx
            .gateway
            .create_recurrence(billing.parent_payment_id, &charge)
            .await
        {
            Ok(payment) if payment.status.is_paid() => {
                let amount = payment.amount.unwrap_or(billing.amount);
                self.record_success(contract, payment.id, amount, report)
                    .await;
                return;
            }
            Ok(payment) => ChargeFailure::Declined(format!(
                "recurrence {} ended as {:?}",
                payment.id, payment.status
            )),
            Err(e) if e.is_transient() => ChargeFailure::Transient(e),
            Err(e) => ChargeFailure::Declined(e.to_string()),
        };

        let reason = match failure {
            ChargeFailure::Transient(e)
                if self.ctx.settings.transient_failures == TransientFailurePolicy::Skip =>
            {
                tracing::warn!(error = %e, "Transient gateway failure, charge left for next run");
                report.skip(format!("[SKIP] contract {id}: {e}"));
                return;
            }
            ChargeFailure::Transient(e) => e.to_string(),
            ChargeFailure::Declined(reason) => reason,
        };
        self.record_failure(contract, reason, report).await;
    }

    async fn record_success(
        &self,
        mut contract: Contract,
        payment_id: GatewayPaymentId,
        amount: Money,
        report: &mut BatchReport,
    ) {
        let id = contract.id;
        let next_billing_date = match contract.record_charge_success() {
            Ok(date) => date,
            Err(e) => {
                report.failure(format!("[ERROR] contract {id}: {e}"));
                return;
            }
        };
        let payment = NewPayment {
            amount,
            paid_at: self.ctx.clock.now(),
            link: PaymentLink::Contract(id),
            gateway_payment_id: Some(payment_id),
        };

        match self.ctx.repos.contracts.record_charge(&contract, payment).await {
            Ok((contract, payment)) => {
                let mut events = EventBuffer::new();
                events.push(DomainEvent::RecurringChargeSucceeded {
                    contract_id: contract.id,
                    payment_id: payment.id,
                    amount,
                    next_billing_date,
                });
                self.ctx.events.publish(events).await;
                tracing::info!(%amount, %next_billing_date, "Recurring charge succeeded");
                report.success(format!(
                    "[CHARGED] contract {id}: {amount}, next charge {next_billing_date}"
                ));
            }
            Err(e) => {
                // The customer was charged; the payment must be recorded by hand
                tracing::error!(
                    gateway_payment_id = %payment_id,
                    error = %e,
                    "Charge succeeded at GoPay but could not be recorded"
                );
                sentry::capture_message(
                    &format!("Unrecorded recurring payment {payment_id} for contract {id}"),
                    sentry::Level::Error,
                );
                report.failure(format!(
                    "[ERROR] contract {id}: payment {payment_id} not recorded: {e}"
                ));
            }
        }
    }

    async fn record_failure(&self, mut contract: Contract, reason: String, report: &mut BatchReport) {
        let id = contract.id;
        let parent = contract
            .active_recurring()
            .map(|billing| billing.parent_payment_id);
        let strike = match contract.record_charge_failure(self.ctx.clock.now()) {
            Ok(strike) => strike,
            Err(e) => {
                report.failure(format!("[ERROR] contract {id}: {e}"));
                return;
            }
        };

        if let Err(e) = self.ctx.repos.contracts.save(&contract).await {
            tracing::error!(error = %e, "Failed to record charge failure");
            report.failure(format!("[ERROR] contract {id}: {e}"));
            return;
        }

        let mut events = EventBuffer::new();
        match strike {
            BillingStrike::First => {
                tracing::warn!(reason, "Recurring charge failed, will retry");
                events.push(DomainEvent::RecurringChargeFailed {
                    contract_id: id,
                    attempt: 1,
                    reason: reason.clone(),
                });
                report.failure(format!(
                    "[FAILED] contract {id}: {reason}, retry in {} days",
                    self.ctx.settings.retry_after.num_days()
                ));
            }
            BillingStrike::Final => {
                if let Some(parent) = parent
                    && let Err(e) = self.ctx.gateway.void_recurrence(parent).await
                {
                    tracing::error!(%parent, error = %e, "Failed to void recurrence");
                }
                tracing::warn!(reason, "Recurring charge failed twice, billing stopped");
                events.push(DomainEvent::RecurringChargeFailed {
                    contract_id: id,
                    attempt: 2,
                    reason: reason.clone(),
                });
                events.push(DomainEvent::RecurringPaymentCancelled {
                    contract_id: id,
                    reason: reason.clone(),
                });
                report.failure(format!("[CANCELLED] contract {id}: {reason}"));
            }
        }
        self.ctx.events.publish(events).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "count".parse::<TransientFailurePolicy>().unwrap(),
            TransientFailurePolicy::Count
        );
        assert_eq!(
            "SKIP".parse::<TransientFailurePolicy>().unwrap(),
            TransientFailurePolicy::Skip
        );
        assert!("ignore".parse::<TransientFailurePolicy>().is_err());
        assert_eq!(TransientFailurePolicy::default().to_string(), "count");
    }
}
