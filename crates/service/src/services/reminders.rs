//! Expiration reminders for contracts nearing their end date.

use chrono::Duration;
use tracing::instrument;

use boxrent_core::DomainEvent;

use super::{BatchReport, ServiceContext};
use crate::error::Result;
use crate::events::EventBuffer;

/// Days before the end date on which customers are reminded.
pub const REMINDER_OFFSETS: [i64; 2] = [7, 1];

/// Service raising `ContractExpiringSoon` events.
pub struct ReminderService {
    ctx: ServiceContext,
}

impl ReminderService {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Remind every contract ending exactly 7 or 1 days from today.
    ///
    /// Meant to run once a day; each reminder fires on exactly one day.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the contracts cannot be listed.
    #[instrument(skip(self))]
    pub async fn send_expiration_reminders(&self) -> Result<BatchReport> {
        let today = self.ctx.clock.today();
        let mut report = BatchReport::default();
        let mut events = EventBuffer::new();

        for days_left in REMINDER_OFFSETS {
            let end_date = today + Duration::days(days_left);
            for contract in self.ctx.repos.contracts.find_ending_on(end_date).await? {
                events.push(DomainEvent::ContractExpiringSoon {
                    contract_id: contract.id,
                    user_id: contract.user_id,
                    end_date,
                    days_left,
                });
                report.success(format!(
                    "[REMINDED] contract {} ends {end_date} ({days_left} days)",
                    contract.id
                ));
            }
        }

        self.ctx.events.publish(events).await;
        tracing::info!(reminders = report.succeeded, "Expiration reminders sent");
        Ok(report)
    }
}
