//! Scheduled batch jobs.
//!
//! Each job builds the production [`ServiceContext`], runs one service
//! operation and prints the report, one line per item. Suggested schedule:
//!
//! ```text
//! expire-orders                  hourly
//! process-recurring-payments     daily
//! retry-failed-payments          daily
//! send-expiration-reminders      daily
//! refresh-storage-statuses       daily, just after midnight
//! generate-self-billing-invoices monthly, on the 1st
//! dispatch-outbox                every few minutes
//! ```

use std::sync::Arc;

use boxrent_core::{BillingPeriod, Clock, SystemClock, UserId};
use boxrent_service::config::AppConfig;
use boxrent_service::db;
use boxrent_service::events::ChannelDispatcher;
use boxrent_service::gopay::GoPayClient;
use boxrent_service::repository::Repositories;
use boxrent_service::services::{
    AvailabilityService, BatchReport, InvoiceOutcome, OrderService, RecurringBillingService, ReminderService,
    SelfBillingService, ServiceContext,
};
use tokio::task::JoinHandle;

/// Capacity of the job's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Which scheduled job to run.
#[derive(Debug, Clone)]
pub enum Job {
    ExpireOrders,
    ProcessRecurringPayments,
    RetryFailedPayments,
    GenerateSelfBillingInvoices {
        period: Option<BillingPeriod>,
        landlord: Option<UserId>,
    },
    SendExpirationReminders,
    RefreshStorageStatuses,
    DispatchOutbox { limit: i64 },
}

/// Run `job` against the configured database and gateway.
///
/// # Errors
///
/// Returns an error if configuration is missing or the job cannot start;
/// per-item failures are reported in the returned [`BatchReport`].
pub async fn run(job: Job) -> Result<BatchReport, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    let gateway = GoPayClient::new(config.gopay.clone())?;
    let (dispatcher, receiver) = ChannelDispatcher::new(EVENT_CHANNEL_CAPACITY);
    let consumer = ChannelDispatcher::spawn_logging_consumer(receiver);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ctx = ServiceContext::new(
        Repositories::postgres(&pool),
        Arc::new(gateway),
        Arc::new(dispatcher),
        clock.clone(),
        config.rental,
    );

    let report = execute(ctx, job, clock.as_ref()).await;
    drain(consumer).await;
    let report = report?;

    print_report(&report);
    Ok(report)
}

async fn execute(
    ctx: ServiceContext,
    job: Job,
    clock: &dyn Clock,
) -> Result<BatchReport, Box<dyn std::error::Error>> {
    let report = match job {
        Job::ExpireOrders => OrderService::new(ctx).expire_overdue_orders().await?,
        Job::ProcessRecurringPayments => RecurringBillingService::new(ctx).process_due().await?,
        Job::RetryFailedPayments => RecurringBillingService::new(ctx).retry_failed().await?,
        Job::GenerateSelfBillingInvoices { period, landlord } => {
            let period = period.unwrap_or_else(|| BillingPeriod::previous_month(clock.now()));
            tracing::info!(%period, "Generating self-billing invoices");
            let service = SelfBillingService::new(ctx);
            match landlord {
                Some(landlord) => single_invoice(&service, landlord, period).await,
                None => service.generate_all(period).await?,
            }
        }
        Job::SendExpirationReminders => {
            ReminderService::new(ctx).send_expiration_reminders().await?
        }
        Job::RefreshStorageStatuses => {
            AvailabilityService::new(ctx)
                .refresh_storage_statuses()
                .await?
        }
        Job::DispatchOutbox { limit } => ctx.events.dispatch_outbox(limit).await?,
    };
    Ok(report)
}

async fn single_invoice(
    service: &SelfBillingService,
    landlord: UserId,
    period: BillingPeriod,
) -> BatchReport {
    let mut report = BatchReport::default();
    match service.generate(landlord, period).await {
        Ok(InvoiceOutcome::Created(invoice)) => report.success(format!(
            "[NEW] {} landlord {landlord}: gross {}, net {}",
            invoice.number, invoice.gross_amount, invoice.net_amount
        )),
        Ok(InvoiceOutcome::Exists(invoice)) => {
            report.skip(format!("[EXISTS] {} landlord {landlord}", invoice.number));
        }
        Err(e) if e.is_skip() => report.skip(format!("[SKIP] landlord {landlord}: {e}")),
        Err(e) => report.failure(format!("[ERROR] landlord {landlord}: {e}")),
    }
    report
}

/// Wait for the event consumer once every sender is gone.
async fn drain(consumer: JoinHandle<()>) {
    if let Err(e) = consumer.await {
        tracing::warn!(error = %e, "Event consumer ended abnormally");
    }
}

#[allow(clippy::print_stdout)]
fn print_report(report: &BatchReport) {
    for line in &report.lines {
        println!("{line}");
    }
    println!("{}", report.summary());
}
