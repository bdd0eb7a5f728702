//! Boxrent Server - GoPay webhook endpoint.
//!
//! This binary serves the payment callbacks on port 3002. Scheduled work
//! (expiration, recurring charges, invoices, reminders) runs through the
//! `boxrent` CLI instead.
//!
//! # Architecture
//!
//! - Axum web framework
//! - `PostgreSQL` repositories via sqlx
//! - GoPay REST API for payment state
//! - Domain events on an in-process channel, with a database outbox for
//!   events the channel refuses

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use boxrent_core::SystemClock;
use boxrent_service::config::AppConfig;
use boxrent_service::db;
use boxrent_service::events::ChannelDispatcher;
use boxrent_service::gopay::GoPayClient;
use boxrent_service::repository::Repositories;
use boxrent_service::routes;
use boxrent_service::services::ServiceContext;
use boxrent_service::state::AppState;
use sentry::integrations::tracing as sentry_tracing;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Capacity of the in-process domain event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Upper bound on a single request, GoPay calls included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &AppConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

/// Install the tracing subscriber.
///
/// Logs are JSON when running on Fly.io, human-readable otherwise.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "boxrent_service=info,boxrent_server=info,tower_http=debug".into());

    let json = std::env::var_os("FLY_APP_NAME").is_some();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment (needed for Sentry init)
    let config = AppConfig::from_env()?;

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // NOTE: Migrations are NOT run automatically on startup.
    // Run them explicitly via: boxrent migrate

    let gateway = GoPayClient::new(config.gopay.clone())?;
    let (dispatcher, receiver) = ChannelDispatcher::new(EVENT_CHANNEL_CAPACITY);
    let consumer = ChannelDispatcher::spawn_logging_consumer(receiver);

    let services = ServiceContext::new(
        Repositories::postgres(&pool),
        Arc::new(gateway),
        Arc::new(dispatcher),
        Arc::new(SystemClock),
        config.rental.clone(),
    );
    let state = AppState::new(services, Some(pool));

    let app = Router::new()
        .merge(routes::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    tracing::info!("boxrent-server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and with it every sender) is gone; let the consumer drain
    if let Err(e) = consumer.await {
        tracing::warn!(error = %e, "Event consumer ended abnormally");
    }
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
