//! Rental contracts and their recurring billing state.

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::order::Order;
use super::storage::{Claim, ClaimSource};
use crate::error::DomainError;
use crate::types::{
    ContractId, ContractTemplateId, GatewayPaymentId, Money, OrderId, PaymentFrequency,
    RentalPeriod, RentalType, StorageId, UserId,
};

/// Failed charges after which the recurrence is voided.
pub const MAX_BILLING_ATTEMPTS: u8 = 2;

/// Gateway recurrence state of an unlimited contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringBilling {
    /// Initial checkout payment every recurrence is charged against.
    pub parent_payment_id: GatewayPaymentId,
    pub amount: Money,
    pub next_billing_date: NaiveDate,
    pub failed_attempts: u8,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Cleared when the recurrence is voided or the contract terminated.
    pub active: bool,
}

/// Signed contract document reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDocument {
    pub template_id: ContractTemplateId,
    pub signed_at: DateTime<Utc>,
}

/// Outcome of recording a failed recurring charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingStrike {
    /// First failure; the contract becomes eligible for one retry.
    First,
    /// Final failure; the recurrence must be voided.
    Final,
}

/// A persisted rental contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub storage_id: StorageId,
    pub rental_type: RentalType,
    pub payment_frequency: PaymentFrequency,
    pub period: RentalPeriod,
    pub terminated_at: Option<DateTime<Utc>>,
    pub recurring: Option<RecurringBilling>,
    pub document: Option<SignedDocument>,
    pub created_at: DateTime<Utc>,
    pub version: i32,
}

/// Contract about to be created from a completed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContract {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub storage_id: StorageId,
    pub rental_type: RentalType,
    pub payment_frequency: PaymentFrequency,
    pub period: RentalPeriod,
    pub recurring: Option<RecurringBilling>,
    pub document: Option<SignedDocument>,
    pub created_at: DateTime<Utc>,
}

impl NewContract {
    /// Contract terms for `order`.
    ///
    /// Unlimited orders paid through a recurring payment start charging one
    /// billing period after the rental starts; the checkout covered the first.
    #[must_use]
    pub fn from_order(
        order: &Order,
        template_id: Option<ContractTemplateId>,
        now: DateTime<Utc>,
    ) -> Self {
        let recurring = match (order.rental_type, order.gateway_parent_payment_id) {
            (RentalType::Unlimited, Some(parent_payment_id)) => Some(RecurringBilling {
                parent_payment_id,
                amount: order.total_price,
                next_billing_date: advance(order.period.start, order.payment_frequency),
                failed_attempts: 0,
                last_failure_at: None,
                active: true,
            }),
            _ => None,
        };

        Self {
            order_id: order.id,
            user_id: order.user_id,
            storage_id: order.storage_id,
            rental_type: order.rental_type,
            payment_frequency: order.payment_frequency,
            period: order.period,
            recurring,
            document: template_id.map(|template_id| SignedDocument {
                template_id,
                signed_at: now,
            }),
            created_at: now,
        }
    }

    #[must_use]
    pub fn into_contract(self, id: ContractId) -> Contract {
        Contract {
            id,
            order_id: self.order_id,
            user_id: self.user_id,
            storage_id: self.storage_id,
            rental_type: self.rental_type,
            payment_frequency: self.payment_frequency,
            period: self.period,
            terminated_at: None,
            recurring: self.recurring,
            document: self.document,
            created_at: self.created_at,
            version: 0,
        }
    }
}

impl Contract {
    /// Whether the scheduler should charge this contract on `today`.
    #[must_use]
    pub fn is_due_for_billing(&self, today: NaiveDate) -> bool {
        self.terminated_at.is_none()
            && self.active_recurring().is_some_and(|billing| {
                billing.failed_attempts == 0 && billing.next_billing_date <= today
            })
    }

    /// Whether a once-failed charge is ready for its single retry.
    #[must_use]
    pub fn needs_retry(&self, now: DateTime<Utc>, retry_after: Duration) -> bool {
        self.terminated_at.is_none()
            && self.active_recurring().is_some_and(|billing| {
                billing.failed_attempts == 1
                    && billing
                        .last_failure_at
                        .is_some_and(|failed_at| failed_at + retry_after <= now)
            })
    }

    /// The recurrence, if charges are still enabled.
    #[must_use]
    pub fn active_recurring(&self) -> Option<&RecurringBilling> {
        self.recurring.as_ref().filter(|billing| billing.active)
    }

    /// Advance to the next billing period after a successful charge.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotRecurring` if charges are disabled.
    pub fn record_charge_success(&mut self) -> Result<NaiveDate, DomainError> {
        let frequency = self.payment_frequency;
        let billing = self.active_recurring_mut()?;
        billing.next_billing_date = advance(billing.next_billing_date, frequency);
        billing.failed_attempts = 0;
        billing.last_failure_at = None;
        Ok(billing.next_billing_date)
    }

    /// Count a failed charge; the second strike disables charging.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotRecurring` if charges are disabled.
    pub fn record_charge_failure(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<BillingStrike, DomainError> {
        let billing = self.active_recurring_mut()?;
        billing.failed_attempts = billing.failed_attempts.saturating_add(1);
        billing.last_failure_at = Some(now);
        if billing.failed_attempts >= MAX_BILLING_ATTEMPTS {
            billing.active = false;
            return Ok(BillingStrike::Final);
        }
        Ok(BillingStrike::First)
    }

    /// Disable further recurring charges.
    pub fn stop_recurring(&mut self) {
        if let Some(billing) = self.recurring.as_mut() {
            billing.active = false;
        }
    }

    /// Terminate an open-ended contract at the end of its paid period.
    ///
    /// Returns the contract's new end date.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotTerminable` for limited contracts and
    /// `DomainError::AlreadyTerminated` on a second attempt.
    pub fn terminate(&mut self, now: DateTime<Utc>) -> Result<NaiveDate, DomainError> {
        if self.rental_type != RentalType::Unlimited {
            return Err(DomainError::NotTerminable(self.id));
        }
        if self.terminated_at.is_some() {
            return Err(DomainError::AlreadyTerminated(self.id));
        }

        let today = now.date_naive();
        let paid_until = self
            .active_recurring()
            .map_or(today, |billing| billing.next_billing_date.max(today));
        let end = paid_until.max(self.period.start + Duration::days(1));

        self.terminated_at = Some(now);
        self.period.end = Some(end);
        self.stop_recurring();
        Ok(end)
    }

    /// The claim this contract holds on its unit.
    #[must_use]
    pub const fn claim(&self) -> Claim {
        Claim {
            source: ClaimSource::Contract(self.id),
            period: self.period,
        }
    }

    fn active_recurring_mut(&mut self) -> Result<&mut RecurringBilling, DomainError> {
        let id = self.id;
        self.recurring
            .as_mut()
            .filter(|billing| billing.active)
            .ok_or(DomainError::NotRecurring(id))
    }
}

/// Date one billing period after `date`.
#[must_use]
pub fn advance(date: NaiveDate, frequency: PaymentFrequency) -> NaiveDate {
    date.checked_add_months(Months::new(frequency.months()))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::order::tests::{now, reserved_order};

    fn unlimited_contract() -> Contract {
        let mut order = reserved_order(RentalType::Unlimited);
        order
            .begin_payment(GatewayPaymentId::new(900), true, now())
            .unwrap();
        order.mark_paid(now()).unwrap();
        order.complete(now()).unwrap();
        NewContract::from_order(&order, None, now()).into_contract(ContractId::new(1))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_charge_one_period_after_start() {
        let contract = unlimited_contract();
        let billing = contract.active_recurring().unwrap();
        assert_eq!(billing.next_billing_date, date(2026, 6, 2));
        assert_eq!(billing.amount, Money::from_minor(99_000));
        assert!(!contract.is_due_for_billing(date(2026, 6, 1)));
        assert!(contract.is_due_for_billing(date(2026, 6, 2)));
    }

    #[test]
    fn test_limited_order_has_no_recurrence() {
        let mut order = reserved_order(RentalType::Limited);
        order
            .begin_payment(GatewayPaymentId::new(5), false, now())
            .unwrap();
        let contract = NewContract::from_order(&order, Some(ContractTemplateId::new(3)), now());
        assert!(contract.recurring.is_none());
        assert_eq!(
            contract.document.unwrap().template_id,
            ContractTemplateId::new(3)
        );
    }

    #[test]
    fn test_success_advances_and_resets() {
        let mut contract = unlimited_contract();
        contract.record_charge_failure(now()).unwrap();
        let next = contract.record_charge_success().unwrap();
        assert_eq!(next, date(2026, 7, 2));
        let billing = contract.active_recurring().unwrap();
        assert_eq!(billing.failed_attempts, 0);
        assert_eq!(billing.last_failure_at, None);
    }

    #[test]
    fn test_two_strikes_disable_charging() {
        let mut contract = unlimited_contract();
        let failed_at = Utc.with_ymd_and_hms(2026, 6, 2, 6, 0, 0).unwrap();

        assert_eq!(
            contract.record_charge_failure(failed_at).unwrap(),
            BillingStrike::First
        );
        assert!(!contract.is_due_for_billing(date(2026, 6, 3)));
        assert!(!contract.needs_retry(failed_at + Duration::days(2), Duration::days(3)));
        assert!(contract.needs_retry(failed_at + Duration::days(3), Duration::days(3)));

        assert_eq!(
            contract
                .record_charge_failure(failed_at + Duration::days(3))
                .unwrap(),
            BillingStrike::Final
        );
        assert!(contract.active_recurring().is_none());
        assert!(!contract.needs_retry(failed_at + Duration::days(30), Duration::days(3)));
        assert_eq!(
            contract.record_charge_failure(failed_at).unwrap_err(),
            DomainError::NotRecurring(contract.id)
        );
    }

    #[test]
    fn test_terminate_once() {
        let mut contract = unlimited_contract();
        let end = contract.terminate(now()).unwrap();
        assert_eq!(end, date(2026, 6, 2));
        assert_eq!(contract.period.end, Some(end));
        assert!(contract.active_recurring().is_none());
        assert_eq!(
            contract.terminate(now()).unwrap_err(),
            DomainError::AlreadyTerminated(contract.id)
        );
    }

    #[test]
    fn test_limited_contract_cannot_be_terminated() {
        let order = reserved_order(RentalType::Limited);
        let mut contract =
            NewContract::from_order(&order, None, now()).into_contract(ContractId::new(2));
        assert_eq!(
            contract.terminate(now()).unwrap_err(),
            DomainError::NotTerminable(ContractId::new(2))
        );
    }

    #[test]
    fn test_yearly_advance() {
        assert_eq!(
            advance(date(2026, 1, 31), PaymentFrequency::Yearly),
            date(2027, 1, 31)
        );
        assert_eq!(
            advance(date(2026, 1, 31), PaymentFrequency::Monthly),
            date(2026, 2, 28)
        );
    }
}
