//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::services::ServiceContext;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    services: ServiceContext,
    /// Absent when the services run on the in-memory store.
    pool: Option<PgPool>,
}

impl AppState {
    #[must_use]
    pub fn new(services: ServiceContext, pool: Option<PgPool>) -> Self {
        Self {
            inner: Arc::new(AppStateInner { services, pool }),
        }
    }

    /// Get a reference to the service collaborators.
    #[must_use]
    pub fn services(&self) -> &ServiceContext {
        &self.inner.services
    }

    /// Get a reference to the database connection pool, if any.
    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }
}
