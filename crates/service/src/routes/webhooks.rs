//! GoPay callbacks.
//!
//! GoPay calls the notification URL with `?id=<payment id>` whenever a
//! payment changes state and retries until it receives a 200. The handler
//! therefore always answers 200; failures are logged and captured, and the
//! next notification (or the expiration sweep) picks the order up again.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use boxrent_core::{GatewayPaymentId, OrderId, OrderStatus};

use crate::error::AppError;
use crate::services::PaymentNotificationService;
use crate::state::AppState;

/// Create GoPay callback routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/webhooks/gopay",
            get(gopay_notification).post(gopay_notification),
        )
        .route("/orders/{order_id}/payment-return", get(payment_return))
}

/// Query string GoPay appends to both callback URLs.
#[derive(Debug, Deserialize)]
pub struct GoPayCallback {
    pub id: Option<String>,
}

impl GoPayCallback {
    fn payment_id(&self) -> Option<GatewayPaymentId> {
        self.id.as_deref().and_then(|raw| raw.trim().parse().ok())
    }
}

/// Handle a GoPay payment notification.
#[instrument(skip(state))]
async fn gopay_notification(
    State(state): State<AppState>,
    Query(callback): Query<GoPayCallback>,
) -> StatusCode {
    let Some(payment_id) = callback.payment_id() else {
        warn!(id = ?callback.id, "GoPay notification without a valid payment id");
        return StatusCode::OK;
    };

    let service = PaymentNotificationService::new(state.services().clone());
    match service.process_notification(payment_id).await {
        Ok(outcome) => info!(%payment_id, ?outcome, "GoPay notification processed"),
        Err(e) => {
            let event_id = sentry::capture_error(&e);
            error!(
                %payment_id,
                error = %e,
                sentry_event_id = %event_id,
                "GoPay notification failed"
            );
        }
    }

    // Return 200 OK to GoPay (always, even on errors - retries come from GoPay itself)
    StatusCode::OK
}

/// Order state shown to the customer after the payment page.
#[derive(Debug, Serialize)]
pub struct PaymentReturn {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

/// The customer came back from the payment page.
///
/// Processes the payment the same way as a notification, since the
/// customer often arrives before GoPay's notification does.
#[instrument(skip(state))]
async fn payment_return(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
    Query(callback): Query<GoPayCallback>,
) -> Result<Json<PaymentReturn>, AppError> {
    let order_id = OrderId::new(order_id);
    let services = state.services();
    let order = services
        .repos
        .orders
        .get(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))?;

    let payment_id = callback
        .payment_id()
        .filter(|id| order.gateway_payment_id == Some(*id))
        .ok_or_else(|| AppError::BadRequest("payment does not belong to the order".to_string()))?;

    PaymentNotificationService::new(services.clone())
        .process_notification(payment_id)
        .await?;

    let status = services
        .repos
        .orders
        .get(order_id)
        .await?
        .map_or(order.status, |order| order.status);
    Ok(Json(PaymentReturn { order_id, status }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_payment_id() {
        let callback = GoPayCallback {
            id: Some(" 3000006529 ".to_string()),
        };
        assert_eq!(
            callback.payment_id(),
            Some(GatewayPaymentId::new(3_000_006_529))
        );
        assert_eq!(GoPayCallback { id: None }.payment_id(), None);
        assert_eq!(
            GoPayCallback {
                id: Some("abc".to_string())
            }
            .payment_id(),
            None
        );
    }
}
