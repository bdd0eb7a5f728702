//! Boxrent CLI - migrations and scheduled batch jobs.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! boxrent migrate
//!
//! # Expire reservations whose hold ran out (hourly)
//! boxrent expire-orders
//!
//! # Charge due recurring contracts, then retry yesterday's failures (daily)
//! boxrent process-recurring-payments
//! boxrent retry-failed-payments
//!
//! # Invoice last month for every landlord, or one landlord and month
//! boxrent generate-self-billing-invoices
//! boxrent generate-self-billing-invoices --year 2026 --month 3 --landlord 12
//!
//! # Remind customers 7 and 1 days before their contract ends (daily)
//! boxrent send-expiration-reminders
//!
//! # Re-derive cached unit statuses as rentals start and end (daily)
//! boxrent refresh-storage-statuses
//!
//! # Retry domain events the in-process channel refused
//! boxrent dispatch-outbox --limit 100
//! ```
//!
//! Every job exits with status 1 if at least one item failed; skipped items
//! do not count as failures.

#![cfg_attr(not(test), forbid(unsafe_code))]

use boxrent_core::{BillingPeriod, UserId};
use clap::{Parser, Subcommand};

use commands::jobs::Job;

mod commands;

#[derive(Parser)]
#[command(name = "boxrent")]
#[command(author, version, about = "Boxrent batch jobs and migrations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Expire reserved and unpaid orders past their hold
    ExpireOrders,
    /// Charge recurring contracts whose billing date has come
    ProcessRecurringPayments,
    /// Retry recurring charges that failed once
    RetryFailedPayments,
    /// Generate monthly self-billing invoices (default: previous month)
    GenerateSelfBillingInvoices {
        /// Invoice year
        #[arg(long, requires = "month")]
        year: Option<i32>,

        /// Invoice month (1-12)
        #[arg(long, requires = "year")]
        month: Option<u32>,

        /// Only invoice this landlord
        #[arg(long)]
        landlord: Option<i32>,
    },
    /// Raise reminders for contracts ending in 7 or 1 days
    SendExpirationReminders,
    /// Recompute every unit's status for today
    RefreshStorageStatuses,
    /// Retry queued domain events
    DispatchOutbox {
        /// Maximum number of events to send
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxrent_service=info,boxrent=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("Command failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Returns whether every item succeeded or was skipped.
async fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let job = match cli.command {
        Commands::Migrate => {
            commands::migrate::run().await?;
            return Ok(true);
        }
        Commands::ExpireOrders => Job::ExpireOrders,
        Commands::ProcessRecurringPayments => Job::ProcessRecurringPayments,
        Commands::RetryFailedPayments => Job::RetryFailedPayments,
        Commands::GenerateSelfBillingInvoices {
            year,
            month,
            landlord,
        } => Job::GenerateSelfBillingInvoices {
            period: match (year, month) {
                (Some(year), Some(month)) => Some(BillingPeriod::new(year, month)?),
                _ => None,
            },
            landlord: landlord.map(UserId::new),
        },
        Commands::SendExpirationReminders => Job::SendExpirationReminders,
        Commands::RefreshStorageStatuses => Job::RefreshStorageStatuses,
        Commands::DispatchOutbox { limit } => Job::DispatchOutbox { limit },
    };

    let report = commands::jobs::run(job).await?;
    Ok(!report.has_failures())
}
