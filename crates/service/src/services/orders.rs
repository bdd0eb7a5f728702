//! Checkout: reserving a unit, redirecting to the gateway, cancelling,
//! expiring and completing orders.

use chrono::NaiveDate;
use tracing::instrument;

use boxrent_core::access::{Action, Actor, Subject};
use boxrent_core::domain::{NewContract, NewOrder, NewPayment, Order, OrderSignature, PaymentLink};
use boxrent_core::{
    DomainError, DomainEvent, GatewayPaymentId, OrderId, OrderStatus, PaymentFrequency, PlaceId,
    RentalPeriod, RentalType, StorageTypeId, UserId, pricing,
};

use super::{BatchReport, ServiceContext, authorize, availability};
use crate::error::{AppError, Result};
use crate::events::EventBuffer;
use crate::gopay::{GoPayError, PaymentRequest};
use crate::repository::CompletedOrder;

/// What the customer submits at checkout.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub user_id: UserId,
    pub storage_type_id: StorageTypeId,
    /// Restrict the search to one place.
    pub place_id: Option<PlaceId>,
    pub rental_type: RentalType,
    pub payment_frequency: PaymentFrequency,
    pub start_date: NaiveDate,
    /// Required for limited rentals, absent for unlimited ones.
    pub end_date: Option<NaiveDate>,
    pub signature: Option<OrderSignature>,
}

/// An order waiting for the customer on the gateway's payment page.
#[derive(Debug, Clone)]
pub struct PaymentRedirect {
    pub order: Order,
    pub gateway_url: String,
}

/// Service for the order lifecycle.
pub struct OrderService {
    ctx: ServiceContext,
}

impl OrderService {
    #[must_use]
    pub const fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Reserve the first free unit of the requested type for the period.
    ///
    /// # Errors
    ///
    /// - `AppError::Domain` / `AppError::BadRequest` for an invalid period
    /// - `AppError::NotFound` for an unknown storage type
    /// - `AppError::NoStorageAvailable` when every unit is taken
    #[instrument(skip(self, checkout), fields(user_id = %checkout.user_id, storage_type_id = %checkout.storage_type_id))]
    pub async fn create_order(&self, checkout: Checkout) -> Result<Order> {
        let now = self.ctx.clock.now();
        let period =
            RentalPeriod::for_rental(checkout.rental_type, checkout.start_date, checkout.end_date)?;
        if period.start < self.ctx.clock.today() {
            return Err(AppError::BadRequest(
                "rental cannot start in the past".to_string(),
            ));
        }

        let storage_type = self
            .ctx
            .repos
            .storages
            .get_type(checkout.storage_type_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("storage type {}", checkout.storage_type_id)))?;
        if let Some(place) = checkout.place_id
            && place != storage_type.place_id
        {
            return Err(AppError::BadRequest(format!(
                "storage type {} is not offered at place {place}",
                storage_type.id
            )));
        }

        let total_price = pricing::quote(
            &storage_type,
            checkout.rental_type,
            checkout.payment_frequency,
            &period,
        );
        let new_order = NewOrder {
            user_id: checkout.user_id,
            storage_type_id: storage_type.id,
            place_id: checkout.place_id,
            rental_type: checkout.rental_type,
            payment_frequency: checkout.payment_frequency,
            period,
            total_price,
            expires_at: now + self.ctx.settings.order_ttl,
            signature: checkout.signature,
            created_at: now,
        };

        let Some((storage, order)) = self
            .ctx
            .repos
            .storages
            .reserve_first_available(new_order)
            .await?
        else {
            tracing::info!(period = %period, "No storage available");
            return Err(AppError::NoStorageAvailable);
        };

        availability::refresh_logged(&self.ctx, storage.id).await;

        let mut events = EventBuffer::new();
        events.push(DomainEvent::OrderReserved {
            order_id: order.id,
            storage_id: storage.id,
            user_id: order.user_id,
            expires_at: order.expires_at.unwrap_or(now),
        });
        self.ctx.events.publish(events).await;

        tracing::info!(
            order_id = %order.id,
            storage = %storage.number,
            price = %order.total_price,
            "Order reserved"
        );
        Ok(order)
    }

    /// Create the gateway payment for a reserved order.
    ///
    /// Limited rentals pay once; unlimited rentals authorize a recurrence
    /// whose first charge is this payment.
    ///
    /// # Errors
    ///
    /// - `AppError::Forbidden` unless the actor owns the order
    /// - `AppError::Domain` unless the order is reserved
    /// - `AppError::Conflict` if the reservation already ran out
    /// - `AppError::Gateway` if GoPay rejects the payment
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn start_payment(&self, order_id: OrderId, actor: &Actor) -> Result<PaymentRedirect> {
        let now = self.ctx.clock.now();
        let mut order = self.load(order_id).await?;
        authorize(actor, Action::Pay, Subject::Order(&order))?;

        if order.status != OrderStatus::Reserved {
            return Err(DomainError::InvalidTransition {
                from: order.status,
                action: "begin payment for",
            }
            .into());
        }
        if order.is_overdue(now) {
            return Err(AppError::Conflict(format!(
                "reservation of order {order_id} has expired"
            )));
        }

        let storage = self.ctx.repos.storages.get(order.storage_id).await?;
        let description = storage.map_or_else(
            || format!("Storage rental {}", order.period),
            |storage| format!("Storage {} rental {}", storage.number, order.period),
        );
        let request = PaymentRequest {
            order_number: order.id.to_string(),
            description,
            amount: order.total_price,
            currency: self.ctx.settings.currency,
            return_url: self.ctx.settings.return_url(order.id),
            notification_url: self.ctx.settings.notification_url(),
        };

        let recurring = order.rental_type == RentalType::Unlimited;
        let payment = if recurring {
            self.ctx.gateway.create_recurring_payment(&request).await?
        } else {
            self.ctx.gateway.create_payment(&request).await?
        };
        let gateway_url = payment.gateway_url.ok_or_else(|| {
            GoPayError::InvalidResponse(format!("payment {} has no gateway URL", payment.id))
        })?;

        order.begin_payment(payment.id, recurring, now)?;
        let order = self.ctx.repos.orders.save(&order).await?;

        let mut events = EventBuffer::new();
        events.push(DomainEvent::OrderPaymentStarted {
            order_id: order.id,
            gateway_payment_id: payment.id,
        });
        self.ctx.events.publish(events).await;

        tracing::info!(order_id = %order.id, gateway_payment_id = %payment.id, recurring, "Payment started");
        Ok(PaymentRedirect { order, gateway_url })
    }

    /// Cancel an order before it is paid, releasing its unit.
    ///
    /// # Errors
    ///
    /// - `AppError::Forbidden` unless the actor owns the order
    /// - `AppError::Domain` once the order is paid or closed
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn cancel_order(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        let order = self.load(order_id).await?;
        authorize(actor, Action::Cancel, Subject::Order(&order))?;
        self.cancel(order).await
    }

    /// Cancel without an access check, for gateway-driven cancellations.
    pub(super) async fn cancel(&self, mut order: Order) -> Result<Order> {
        order.cancel(self.ctx.clock.now())?;
        let order = self.ctx.repos.orders.save(&order).await?;
        availability::refresh_logged(&self.ctx, order.storage_id).await;

        let mut events = EventBuffer::new();
        events.push(DomainEvent::OrderCancelled {
            order_id: order.id,
            storage_id: order.storage_id,
        });
        self.ctx.events.publish(events).await;

        tracing::info!(order_id = %order.id, "Order cancelled");
        Ok(order)
    }

    /// Expire every reservation whose hold ran out.
    ///
    /// Orders changed by a concurrent request (typically a payment landing at
    /// the same moment) are skipped; running the job twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the overdue orders cannot be listed.
    #[instrument(skip(self))]
    pub async fn expire_overdue_orders(&self) -> Result<BatchReport> {
        let now = self.ctx.clock.now();
        let mut report = BatchReport::default();

        for mut order in self.ctx.repos.orders.find_overdue(now).await? {
            let id = order.id;
            if let Err(e) = order.expire(now) {
                report.failure(format!("[ERROR] order {id}: {e}"));
                continue;
            }

            match self.ctx.repos.orders.save(&order).await {
                Ok(order) => {
                    availability::refresh_logged(&self.ctx, order.storage_id).await;
                    let mut events = EventBuffer::new();
                    events.push(DomainEvent::OrderExpired {
                        order_id: order.id,
                        storage_id: order.storage_id,
                    });
                    self.ctx.events.publish(events).await;
                    report.success(format!("[EXPIRED] order {id}"));
                }
                Err(e) => match AppError::from(e) {
                    AppError::Conflict(_) => {
                        report.skip(format!("[SKIP] order {id}: changed concurrently"));
                    }
                    e => {
                        tracing::error!(order_id = %id, error = %e, "Failed to expire order");
                        report.failure(format!("[ERROR] order {id}: {e}"));
                    }
                },
            }
        }

        tracing::info!(
            expired = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "Expired overdue orders"
        );
        Ok(report)
    }

    /// Turn a paid order into a contract and its first payment.
    ///
    /// # Errors
    ///
    /// - `AppError::Domain` unless the order is paid
    /// - `AppError::Conflict` if the order was completed concurrently
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn complete_order(
        &self,
        mut order: Order,
        gateway_payment_id: GatewayPaymentId,
    ) -> Result<CompletedOrder> {
        let now = self.ctx.clock.now();
        let storage = self
            .ctx
            .repos
            .storages
            .get(order.storage_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("storage {}", order.storage_id)))?;
        let template = self
            .ctx
            .repos
            .contracts
            .template_for_place(storage.place_id)
            .await?;
        if template.is_none() {
            tracing::warn!(place_id = %storage.place_id, "Place has no contract template");
        }

        order.complete(now)?;
        let contract = NewContract::from_order(&order, template, now);
        let payment = NewPayment {
            amount: order.total_price,
            paid_at: now,
            link: PaymentLink::Order(order.id),
            gateway_payment_id: Some(gateway_payment_id),
        };
        let completed = self
            .ctx
            .repos
            .orders
            .complete(&order, contract, payment)
            .await?;

        availability::refresh_logged(&self.ctx, storage.id).await;

        let mut events = EventBuffer::new();
        events.push(DomainEvent::OrderCompleted {
            order_id: completed.order.id,
            contract_id: completed.contract.id,
            payment_id: completed.payment.id,
        });
        self.ctx.events.publish(events).await;

        tracing::info!(
            order_id = %completed.order.id,
            contract_id = %completed.contract.id,
            recurring = completed.contract.recurring.is_some(),
            "Order completed"
        );
        Ok(completed)
    }

    async fn load(&self, id: OrderId) -> Result<Order> {
        self.ctx
            .repos
            .orders
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {id}")))
    }
}
