//! GoPay payment notifications.
//!
//! GoPay only tells us *which* payment changed; the state is always fetched
//! back from the gateway. Notifications repeat, arrive out of order and race
//! each other, so every branch is safe to run twice.

use tracing::instrument;

use boxrent_core::domain::Order;
use boxrent_core::{ContractId, DomainEvent, GatewayPaymentId, OrderId, OrderStatus};

use super::{OrderService, ServiceContext};
use crate::error::{AppError, Result};
use crate::events::EventBuffer;
use crate::gopay::{GoPayPayment, GoPayPaymentStatus};

/// What a notification did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The order was paid and turned into a contract.
    Completed {
        order_id: OrderId,
        contract_id: ContractId,
    },
    /// Nothing left to do, a previous notification handled it.
    AlreadyProcessed(OrderId),
    /// The payment failed and the order released its unit.
    Cancelled(OrderId),
    /// The payment is still in progress.
    Pending(GoPayPaymentStatus),
    /// Money arrived for an order that had already expired or been cancelled.
    PaymentAfterClosure(OrderId),
    /// A recurrence charge; the billing scheduler records those itself.
    Recurrence { parent: GatewayPaymentId },
    /// No order references the payment.
    UnknownPayment,
}

/// Service applying gateway notifications to orders.
pub struct PaymentNotificationService {
    ctx: ServiceContext,
    orders: OrderService,
}

impl PaymentNotificationService {
    #[must_use]
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            orders: OrderService::new(ctx.clone()),
            ctx,
        }
    }

    /// Fetch the payment's state from GoPay and advance its order.
    ///
    /// # Errors
    ///
    /// - `AppError::Gateway` if the status cannot be fetched
    /// - `AppError::Database` if the order cannot be loaded or saved
    #[instrument(skip(self))]
    pub async fn process_notification(
        &self,
        payment_id: GatewayPaymentId,
    ) -> Result<NotificationOutcome> {
        let payment = self.ctx.gateway.get_status(payment_id).await?;
        tracing::info!(status = ?payment.status, "Fetched payment status");

        let Some(order) = self
            .ctx
            .repos
            .orders
            .find_by_gateway_payment(payment_id)
            .await?
        else {
            if let Some(parent) = payment.parent_id {
                tracing::debug!(%parent, "Notification for a recurrence charge");
                return Ok(NotificationOutcome::Recurrence { parent });
            }
            tracing::warn!("Notification for a payment no order references");
            return Ok(NotificationOutcome::UnknownPayment);
        };

        let order_id = order.id;
        let outcome = if payment.status.is_paid() {
            self.handle_paid(order, &payment).await
        } else if payment.status.is_failed() {
            self.handle_failed(order).await
        } else {
            return Ok(NotificationOutcome::Pending(payment.status));
        };

        match outcome {
            // A concurrent notification moved the order first
            Err(AppError::Conflict(reason)) => {
                let Some(current) = self.ctx.repos.orders.get(order_id).await? else {
                    return Err(AppError::Conflict(reason));
                };
                match current.status {
                    // Expiry won the race against the payment
                    OrderStatus::Cancelled | OrderStatus::Expired if payment.status.is_paid() => {
                        self.handle_paid(current, &payment).await
                    }
                    OrderStatus::Paid
                    | OrderStatus::Completed
                    | OrderStatus::Cancelled
                    | OrderStatus::Expired => {
                        tracing::info!(%order_id, reason, "Order handled by a concurrent request");
                        Ok(NotificationOutcome::AlreadyProcessed(order_id))
                    }
                    _ => Err(AppError::Conflict(reason)),
                }
            }
            other => other,
        }
    }

    async fn handle_paid(
        &self,
        order: Order,
        payment: &GoPayPayment,
    ) -> Result<NotificationOutcome> {
        let now = self.ctx.clock.now();
        match order.status {
            OrderStatus::Completed => Ok(NotificationOutcome::AlreadyProcessed(order.id)),
            OrderStatus::Cancelled | OrderStatus::Expired => {
                tracing::error!(
                    order_id = %order.id,
                    gateway_payment_id = %payment.id,
                    status = %order.status,
                    "Payment received for a closed order, refund needed"
                );
                sentry::capture_message(
                    &format!("Payment {} received for closed order {}", payment.id, order.id),
                    sentry::Level::Error,
                );
                let mut events = EventBuffer::new();
                events.push(DomainEvent::PaymentAfterClosure {
                    order_id: order.id,
                    gateway_payment_id: payment.id,
                });
                self.ctx.events.publish(events).await;
                Ok(NotificationOutcome::PaymentAfterClosure(order.id))
            }
            // A previous attempt stopped between the two steps
            OrderStatus::Paid => self.complete(order, payment.id).await,
            _ => {
                let mut order = order;
                order.mark_paid(now)?;
                let order = self.ctx.repos.orders.save(&order).await?;
                self.complete(order, payment.id).await
            }
        }
    }

    async fn complete(
        &self,
        order: Order,
        payment_id: GatewayPaymentId,
    ) -> Result<NotificationOutcome> {
        let completed = self.orders.complete_order(order, payment_id).await?;
        Ok(NotificationOutcome::Completed {
            order_id: completed.order.id,
            contract_id: completed.contract.id,
        })
    }

    async fn handle_failed(&self, order: Order) -> Result<NotificationOutcome> {
        if order.status.claims_storage() && order.status != OrderStatus::Paid {
            let order = self.orders.cancel(order).await?;
            Ok(NotificationOutcome::Cancelled(order.id))
        } else {
            Ok(NotificationOutcome::AlreadyProcessed(order.id))
        }
    }
}
