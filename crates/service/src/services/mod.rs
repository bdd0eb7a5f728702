//! Business logic services.
//!
//! Every service owns a clone of the [`ServiceContext`] (all fields are
//! cheap `Arc` handles) and returns `Result<T, AppError>`. Batch operations
//! return a [`BatchReport`] instead of failing on the first bad item.

pub mod availability;
pub mod contracts;
pub mod orders;
pub mod payments;
pub mod recurring;
pub mod reminders;
pub mod self_billing;
pub mod storages;

use std::sync::Arc;

use boxrent_core::Clock;
use boxrent_core::access::{self, Action, Actor, Subject};

pub use availability::AvailabilityService;
pub use contracts::ContractService;
pub use orders::{Checkout, OrderService, PaymentRedirect};
pub use payments::{NotificationOutcome, PaymentNotificationService};
pub use recurring::{RecurringBillingService, TransientFailurePolicy};
pub use reminders::ReminderService;
pub use self_billing::{InvoiceOutcome, SelfBillingService};
pub use storages::StorageAdminService;

use crate::config::RentalSettings;
use crate::error::AppError;
use crate::events::{EventBus, EventDispatcher};
use crate::gopay::PaymentGateway;
use crate::repository::Repositories;

/// Collaborators shared by all services.
#[derive(Clone)]
pub struct ServiceContext {
    pub repos: Repositories,
    pub gateway: Arc<dyn PaymentGateway>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    pub settings: RentalSettings,
}

impl ServiceContext {
    /// Wire services to their collaborators; failed event dispatches go to
    /// the repositories' outbox.
    #[must_use]
    pub fn new(
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        dispatcher: Arc<dyn EventDispatcher>,
        clock: Arc<dyn Clock>,
        settings: RentalSettings,
    ) -> Self {
        let events = EventBus::new(dispatcher, repos.outbox.clone(), clock.clone());
        Self {
            repos,
            gateway,
            events,
            clock,
            settings,
        }
    }
}

/// Per-item outcome counts of a batch job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// One human-readable line per item, in processing order.
    pub lines: Vec<String>,
}

impl BatchReport {
    pub fn success(&mut self, line: String) {
        self.succeeded += 1;
        self.lines.push(line);
    }

    pub fn skip(&mut self, line: String) {
        self.skipped += 1;
        self.lines.push(line);
    }

    pub fn failure(&mut self, line: String) {
        self.failed += 1;
        self.lines.push(line);
    }

    /// Skips are not failures.
    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} skipped, {} failed",
            self.succeeded, self.skipped, self.failed
        )
    }
}

/// Fail with `AppError::Forbidden` unless `actor` may perform `action`.
fn authorize(actor: &Actor, action: Action, subject: Subject<'_>) -> Result<(), AppError> {
    if access::decide(actor, action, subject).is_allowed() {
        Ok(())
    } else {
        tracing::warn!(actor_id = %actor.id, ?action, "Access denied");
        Err(AppError::Forbidden(format!("{action:?} is not allowed")))
    }
}
