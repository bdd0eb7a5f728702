//! Integration test harness for boxrent.
//!
//! Scenarios run the real services on the in-memory repositories, a
//! scripted [`PaymentGateway`] and a [`FixedClock`], so every test controls
//! time, gateway answers and event delivery.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p boxrent-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use url::Url;

use boxrent_core::access::Actor;
use boxrent_core::domain::{Contract, Order, Place, Storage, StorageType, User};
use boxrent_core::{
    CommissionRate, DomainEvent, EventEnvelope, FixedClock, GatewayPaymentId, Money,
    PaymentFrequency, PlaceId, RentalType, StorageId, StorageStatus, StorageTypeId, UserId,
};
use boxrent_service::config::RentalSettings;
use boxrent_service::events::{DispatchError, EventDispatcher};
use boxrent_service::gopay::{
    GoPayError, GoPayPayment, GoPayPaymentStatus, PaymentGateway, PaymentRequest, RecurrenceCharge,
};
use boxrent_service::error::AppError;
use boxrent_service::memory::InMemoryStore;
use boxrent_service::repository::Repositories;
use boxrent_service::services::{
    Checkout, NotificationOutcome, OrderService, PaymentNotificationService, ServiceContext,
};

pub const LANDLORD: UserId = UserId::new(1);
pub const CUSTOMER: UserId = UserId::new(2);
pub const OTHER_CUSTOMER: UserId = UserId::new(3);
pub const ADMIN: UserId = UserId::new(4);
pub const PLACE: PlaceId = PlaceId::new(1);
pub const SMALL_BOX: StorageTypeId = StorageTypeId::new(1);

/// Monthly price of [`SMALL_BOX`].
pub const SMALL_BOX_PRICE: Money = Money::from_minor(50_000);

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Scripted Gateway
// =============================================================================

#[derive(Default)]
struct GatewayState {
    next_id: i64,
    payments: HashMap<GatewayPaymentId, GoPayPayment>,
    recurrence_script: VecDeque<Result<GoPayPaymentStatus, GoPayError>>,
    recurrence_calls: Vec<(GatewayPaymentId, RecurrenceCharge)>,
    voided: Vec<GatewayPaymentId>,
    fail_void: bool,
    fail_status: bool,
}

impl GatewayState {
    fn next_payment(
        &mut self,
        status: GoPayPaymentStatus,
        amount: Money,
        parent_id: Option<GatewayPaymentId>,
    ) -> GoPayPayment {
        self.next_id += 1;
        let id = GatewayPaymentId::new(3_000_000_000 + self.next_id);
        let payment = GoPayPayment {
            id,
            status,
            gateway_url: Some(format!("https://gw.sandbox.gopay.com/gw/{id}")),
            parent_id,
            amount: Some(amount),
        };
        self.payments.insert(id, payment.clone());
        payment
    }
}

/// In-process GoPay stand-in whose answers tests script up front.
///
/// Recurrence charges succeed unless a result was queued with
/// [`ScriptedGateway::script_recurrence`].
#[derive(Default)]
pub struct ScriptedGateway {
    state: Mutex<GatewayState>,
}

impl ScriptedGateway {
    /// Change what GoPay reports for `id`.
    pub fn set_status(&self, id: GatewayPaymentId, status: GoPayPaymentStatus) {
        if let Some(payment) = lock(&self.state).payments.get_mut(&id) {
            payment.status = status;
        }
    }

    /// Queue the outcome of the next recurrence charge.
    pub fn script_recurrence(&self, result: Result<GoPayPaymentStatus, GoPayError>) {
        lock(&self.state).recurrence_script.push_back(result);
    }

    /// Every recurrence charge attempted, in order.
    #[must_use]
    pub fn recurrence_calls(&self) -> Vec<(GatewayPaymentId, RecurrenceCharge)> {
        lock(&self.state).recurrence_calls.clone()
    }

    #[must_use]
    pub fn voided(&self) -> Vec<GatewayPaymentId> {
        lock(&self.state).voided.clone()
    }

    pub fn fail_void(&self, fail: bool) {
        lock(&self.state).fail_void = fail;
    }

    /// Make status lookups fail as if GoPay were down.
    pub fn fail_status(&self, fail: bool) {
        lock(&self.state).fail_status = fail;
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_payment(&self, request: &PaymentRequest) -> Result<GoPayPayment, GoPayError> {
        Ok(lock(&self.state).next_payment(GoPayPaymentStatus::Created, request.amount, None))
    }

    async fn create_recurring_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<GoPayPayment, GoPayError> {
        Ok(lock(&self.state).next_payment(GoPayPaymentStatus::Created, request.amount, None))
    }

    async fn create_recurrence(
        &self,
        parent: GatewayPaymentId,
        charge: &RecurrenceCharge,
    ) -> Result<GoPayPayment, GoPayError> {
        let mut state = lock(&self.state);
        state.recurrence_calls.push((parent, charge.clone()));
        let status = state
            .recurrence_script
            .pop_front()
            .unwrap_or(Ok(GoPayPaymentStatus::Paid))?;
        Ok(state.next_payment(status, charge.amount, Some(parent)))
    }

    async fn void_recurrence(&self, parent: GatewayPaymentId) -> Result<(), GoPayError> {
        let mut state = lock(&self.state);
        if state.fail_void {
            return Err(GoPayError::Api {
                status: 500,
                body: "void failed".to_string(),
            });
        }
        state.voided.push(parent);
        Ok(())
    }

    async fn get_status(&self, id: GatewayPaymentId) -> Result<GoPayPayment, GoPayError> {
        let state = lock(&self.state);
        if state.fail_status {
            return Err(GoPayError::Timeout);
        }
        state.payments.get(&id).cloned().ok_or(GoPayError::Api {
            status: 404,
            body: format!("payment {id} not found"),
        })
    }
}

// =============================================================================
// Recording Dispatcher
// =============================================================================

/// Dispatcher keeping every accepted event; can be told to refuse.
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<EventEnvelope>>,
    refuse: AtomicBool,
}

impl RecordingDispatcher {
    #[must_use]
    pub fn events(&self) -> Vec<DomainEvent> {
        lock(&self.events)
            .iter()
            .map(|envelope| envelope.event.clone())
            .collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.events)
            .iter()
            .map(|envelope| envelope.event.name())
            .collect()
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&self, envelope: &EventEnvelope) -> Result<(), DispatchError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DispatchError::Failed("consumer unavailable".to_string()));
        }
        lock(&self.events).push(envelope.clone());
        Ok(())
    }
}

// =============================================================================
// World
// =============================================================================

/// Everything a scenario needs, seeded with one landlord, one place and
/// one storage type.
pub struct World {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub clock: Arc<FixedClock>,
    pub events: Arc<RecordingDispatcher>,
    pub ctx: ServiceContext,
}

impl World {
    /// A world whose clock reads `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let clock = Arc::new(FixedClock::new(now));
        let events = Arc::new(RecordingDispatcher::default());

        let ctx = ServiceContext::new(
            Repositories::in_memory(&store),
            gateway.clone(),
            events.clone(),
            clock.clone(),
            RentalSettings::new(base_url()),
        );

        let world = Self {
            store,
            gateway,
            clock,
            events,
            ctx,
        };
        world.seed();
        world
    }

    fn seed(&self) {
        self.store.insert_user(landlord(LANDLORD, Some("SB"), "0.90"));
        self.store.insert_user(customer(CUSTOMER));
        self.store.insert_user(customer(OTHER_CUSTOMER));
        self.store.insert_user(User {
            is_admin: true,
            ..customer(ADMIN)
        });
        self.store.insert_place(Place {
            id: PLACE,
            owner_id: LANDLORD,
            name: "Holešovice".to_string(),
            address: "Komunardů 1, Praha".to_string(),
        });
        self.store.insert_storage_type(StorageType {
            id: SMALL_BOX,
            place_id: PLACE,
            name: "Small box".to_string(),
            dimensions: Some("1x1x2 m".to_string()),
            price_per_month: SMALL_BOX_PRICE,
        });
        self.store.insert_template(PLACE);
    }

    /// Add a unit of [`SMALL_BOX`] owned by [`LANDLORD`].
    pub fn add_unit(&self, id: i32, number: &str) -> StorageId {
        let id = StorageId::new(id);
        self.store.insert_storage(Storage {
            id,
            number: number.to_string(),
            coordinates: None,
            storage_type_id: SMALL_BOX,
            place_id: PLACE,
            owner_id: LANDLORD,
            status: StorageStatus::Available,
            commission_rate: None,
        });
        id
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        boxrent_core::Clock::now(self.clock.as_ref())
    }

    #[must_use]
    pub fn orders(&self) -> OrderService {
        OrderService::new(self.ctx.clone())
    }

    #[must_use]
    pub fn notifications(&self) -> PaymentNotificationService {
        PaymentNotificationService::new(self.ctx.clone())
    }

    /// Check out a monthly rental of `storage_type` for `user`.
    ///
    /// # Errors
    ///
    /// Whatever `create_order` rejects the checkout with.
    pub async fn reserve(
        &self,
        user: UserId,
        storage_type: StorageTypeId,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Order, AppError> {
        let rental_type = if end.is_some() {
            RentalType::Limited
        } else {
            RentalType::Unlimited
        };
        self.orders()
            .create_order(Checkout {
                user_id: user,
                storage_type_id: storage_type,
                place_id: None,
                rental_type,
                payment_frequency: PaymentFrequency::Monthly,
                start_date: start,
                end_date: end,
                signature: None,
            })
            .await
    }

    /// Reserve, pay and complete a rental, returning its contract.
    ///
    /// # Panics
    ///
    /// If any step of the checkout fails.
    pub async fn rent(
        &self,
        user: UserId,
        storage_type: StorageTypeId,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Contract {
        let order = self
            .reserve(user, storage_type, start, end)
            .await
            .expect("order reserved");
        let payment_id = self.start_payment(&order, user).await;
        self.gateway.set_status(payment_id, GoPayPaymentStatus::Paid);

        let outcome = self
            .notifications()
            .process_notification(payment_id)
            .await
            .expect("notification processed");
        let NotificationOutcome::Completed { contract_id, .. } = outcome else {
            panic!("expected a completed order, got {outcome:?}");
        };
        self.ctx
            .repos
            .contracts
            .get(contract_id)
            .await
            .expect("contract readable")
            .expect("contract stored")
    }

    /// Redirect `user` to the gateway for `order`, returning the payment id.
    ///
    /// # Panics
    ///
    /// If the payment cannot be started.
    pub async fn start_payment(&self, order: &Order, user: UserId) -> GatewayPaymentId {
        let redirect = self
            .orders()
            .start_payment(order.id, &actor(user))
            .await
            .expect("payment started");
        redirect
            .order
            .gateway_payment_id
            .expect("gateway payment recorded")
    }

    /// Current state of `id`.
    ///
    /// # Panics
    ///
    /// If the order does not exist.
    pub async fn order(&self, id: boxrent_core::OrderId) -> Order {
        self.ctx
            .repos
            .orders
            .get(id)
            .await
            .expect("order readable")
            .expect("order stored")
    }

    /// Current state of `id`.
    ///
    /// # Panics
    ///
    /// If the contract does not exist.
    pub async fn contract(&self, id: boxrent_core::ContractId) -> Contract {
        self.ctx
            .repos
            .contracts
            .get(id)
            .await
            .expect("contract readable")
            .expect("contract stored")
    }
}

#[must_use]
pub fn base_url() -> Url {
    Url::parse("https://boxrent.test/").unwrap_or_else(|_| unreachable!())
}

/// Noon UTC on the given day of 2026.
#[must_use]
pub fn at(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, 12, 0, 0)
        .single()
        .unwrap_or_else(|| unreachable!("invalid test date 2026-{month}-{day}"))
}

#[must_use]
pub fn date(month: u32, day: u32) -> NaiveDate {
    at(month, day).date_naive()
}

#[must_use]
pub fn rate(value: &str) -> CommissionRate {
    value
        .parse::<Decimal>()
        .ok()
        .and_then(|rate| CommissionRate::new(rate).ok())
        .unwrap_or_else(|| unreachable!("invalid test rate {value}"))
}

#[must_use]
pub fn customer(id: UserId) -> User {
    User {
        id,
        email: format!("customer{id}@boxrent.test"),
        name: format!("Customer {id}"),
        is_admin: false,
        is_landlord: false,
        commission_rate: rate("0.90"),
        self_billing_prefix: None,
    }
}

#[must_use]
pub fn landlord(id: UserId, prefix: Option<&str>, commission: &str) -> User {
    User {
        id,
        email: format!("landlord{id}@boxrent.test"),
        name: format!("Landlord {id}"),
        is_admin: false,
        is_landlord: true,
        commission_rate: rate(commission),
        self_billing_prefix: prefix.map(str::to_string),
    }
}

#[must_use]
pub const fn actor(id: UserId) -> Actor {
    Actor {
        id,
        is_admin: false,
        is_landlord: false,
    }
}

#[must_use]
pub const fn landlord_actor(id: UserId) -> Actor {
    Actor {
        id,
        is_admin: false,
        is_landlord: true,
    }
}
