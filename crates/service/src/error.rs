//! Unified error handling with Sentry integration.
//!
//! Services return `Result<T, AppError>`. The HTTP layer renders it through
//! `IntoResponse`; batch jobs classify it into report lines.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use boxrent_core::{BillingPeriod, DomainError, UserId};
use thiserror::Error;

use crate::db::RepositoryError;
use crate::gopay::GoPayError;

/// Application-level error type for the rental service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(RepositoryError),

    /// Payment gateway call failed.
    #[error("GoPay error: {0}")]
    Gateway(#[from] GoPayError),

    /// A domain rule rejected the operation.
    #[error("{0}")]
    Domain(#[from] DomainError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The actor may not perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Every unit of the requested type is taken for the period.
    #[error("No storage available for the requested period")]
    NoStorageAvailable,

    /// The unit still has rentals reaching past today.
    #[error("Storage cannot be deleted: {0}")]
    StorageCannotBeDeleted(String),

    /// The unit still has rentals reaching past today, or the type belongs
    /// to another place.
    #[error("Storage cannot be reassigned: {0}")]
    StorageCannotBeReassigned(String),

    /// Concurrent modification or already-processed resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Landlord has nothing to invoice for the period.
    #[error("No payments for landlord {landlord} in {period}")]
    NoPaymentsForPeriod {
        landlord: UserId,
        period: BillingPeriod,
    },

    /// Landlord has no self-billing prefix and is invoiced manually.
    #[error("Self-billing is not configured for landlord {0}")]
    SelfBillingNotConfigured(UserId),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound("record".to_string()),
            RepositoryError::Conflict(msg) => Self::Conflict(msg),
            other => Self::Database(other),
        }
    }
}

impl AppError {
    /// Outcomes batch jobs report as skipped rather than failed.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::NoPaymentsForPeriod { .. } | Self::SelfBillingNotConfigured(_)
        )
    }

    /// Failures on our side, as opposed to a rejected request.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Internal(_) | Self::Gateway(_))
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Domain(DomainError::InvalidPeriod(_) | DomainError::InvalidBillingPeriod { .. })
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Domain(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NoStorageAvailable
            | Self::StorageCannotBeDeleted(_)
            | Self::StorageCannotBeReassigned(_)
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NoPaymentsForPeriod { .. } | Self::SelfBillingNotConfigured(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if self.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Gateway(_) => "Payment gateway error".to_string(),
            _ => self.to_string(),
        };

        (self.status_code(), message).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxrent_core::OrderStatus;

    use super::*;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order 12".to_string());
        assert_eq!(err.to_string(), "Not found: order 12");

        let err = AppError::NoPaymentsForPeriod {
            landlord: UserId::new(4),
            period: BillingPeriod::new(2026, 3).unwrap(),
        };
        assert_eq!(err.to_string(), "No payments for landlord 4 in 2026-03");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(get_status(AppError::NoStorageAvailable), StatusCode::CONFLICT);
        assert_eq!(
            get_status(AppError::StorageCannotBeDeleted("A1".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::Forbidden("test".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::Domain(DomainError::InvalidTransition {
                from: OrderStatus::Completed,
                action: "cancel",
            })),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            get_status(AppError::Gateway(GoPayError::Timeout)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_repository_errors_keep_their_meaning() {
        assert!(matches!(
            AppError::from(RepositoryError::Conflict("stale".to_string())),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            AppError::from(RepositoryError::NotFound),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(RepositoryError::DataCorruption("bad row".to_string())),
            AppError::Database(_)
        ));
    }

    #[test]
    fn test_skips() {
        assert!(AppError::SelfBillingNotConfigured(UserId::new(1)).is_skip());
        assert!(!AppError::Internal("x".to_string()).is_skip());
    }
}
