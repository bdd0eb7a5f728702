//! Repository seams used by the services.
//!
//! Every trait has a `PostgreSQL` implementation in [`crate::db`] and an
//! in-memory one in [`crate::memory`] with the same semantics. Services hold
//! them as `Arc<dyn …>` through [`Repositories`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use boxrent_core::domain::{
    BillablePayment, Contract, InvoiceDraft, NewContract, NewOrder, NewPayment, Order, Payment,
    SelfBillingInvoice, Storage, StorageOccupancy, StorageType, UnavailabilityBlock, User,
};
use boxrent_core::{
    BillingPeriod, ContractId, ContractTemplateId, EventEnvelope, GatewayPaymentId, InvoiceId,
    OrderId, PlaceId, RentalPeriod, StorageId, StorageStatus, StorageTypeId, UnavailabilityId,
    UserId,
};

use crate::db::{
    PgContractRepository, PgInvoiceRepository, PgOrderRepository, PgOutboxRepository,
    PgPaymentRepository, PgStorageRepository, PgUserRepository, RepositoryError,
};
use crate::memory::InMemoryStore;

/// Result of committing a paid order.
#[derive(Debug, Clone)]
pub struct CompletedOrder {
    pub order: Order,
    pub contract: Contract,
    pub payment: Payment,
}

/// Outcome of an invoice insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceCreation {
    Created(SelfBillingInvoice),
    /// An invoice for the landlord and period already existed (possibly
    /// created by a concurrent run).
    Exists(SelfBillingInvoice),
}

/// A domain event waiting in the durable retry queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub envelope: EventEnvelope,
    pub attempts: i32,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait StorageRepository: Send + Sync {
    async fn get(&self, id: StorageId) -> Result<Option<Storage>, RepositoryError>;

    async fn get_type(&self, id: StorageTypeId) -> Result<Option<StorageType>, RepositoryError>;

    /// Units of a type (optionally within one place) with their claims and blocks.
    async fn occupancies(
        &self,
        storage_type: StorageTypeId,
        place: Option<PlaceId>,
    ) -> Result<Vec<StorageOccupancy>, RepositoryError>;

    async fn occupancy(&self, id: StorageId) -> Result<Option<StorageOccupancy>, RepositoryError>;

    /// Every live unit with its claims and blocks, ordered by id.
    async fn all_occupancies(&self) -> Result<Vec<StorageOccupancy>, RepositoryError>;

    /// Atomically pick the first free unit for the order's type and period
    /// and insert the order as reserved on it.
    ///
    /// Returns `None` when no unit is free, including when a concurrent
    /// checkout claimed the last one.
    async fn reserve_first_available(
        &self,
        order: NewOrder,
    ) -> Result<Option<(Storage, Order)>, RepositoryError>;

    async fn update_status(
        &self,
        id: StorageId,
        status: StorageStatus,
    ) -> Result<(), RepositoryError>;

    async fn add_block(
        &self,
        storage_id: StorageId,
        period: RentalPeriod,
        reason: &str,
    ) -> Result<UnavailabilityBlock, RepositoryError>;

    /// Remove a block, returning it if it existed.
    async fn remove_block(
        &self,
        id: UnavailabilityId,
    ) -> Result<Option<UnavailabilityBlock>, RepositoryError>;

    /// Delete a unit unless a claim reaches past `today`.
    ///
    /// Returns `RepositoryError::Conflict` when such a claim exists.
    async fn delete(&self, id: StorageId, today: NaiveDate) -> Result<(), RepositoryError>;

    /// Move a unit to another type unless a claim reaches past `today`.
    ///
    /// Returns `RepositoryError::Conflict` when such a claim exists.
    async fn change_type(
        &self,
        id: StorageId,
        storage_type: StorageTypeId,
        today: NaiveDate,
    ) -> Result<Storage, RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn find_by_gateway_payment(
        &self,
        payment_id: GatewayPaymentId,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Reserved or awaiting-payment orders whose hold ran out before `now`.
    async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Order>, RepositoryError>;

    /// Persist `order` if nobody changed it since it was loaded.
    ///
    /// Returns the stored order with its bumped version, or
    /// `RepositoryError::Conflict` for a stale copy.
    async fn save(&self, order: &Order) -> Result<Order, RepositoryError>;

    /// Persist a completed order together with its contract and payment in
    /// one transaction.
    async fn complete(
        &self,
        order: &Order,
        contract: NewContract,
        payment: NewPayment,
    ) -> Result<CompletedOrder, RepositoryError>;
}

#[async_trait]
pub trait ContractRepository: Send + Sync {
    async fn get(&self, id: ContractId) -> Result<Option<Contract>, RepositoryError>;

    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Contract>, RepositoryError>;

    /// Recurring contracts with a clean record whose next charge is due.
    async fn find_due_for_billing(&self, today: NaiveDate)
    -> Result<Vec<Contract>, RepositoryError>;

    /// Recurring contracts with one failed charge recorded before `failed_before`.
    async fn find_needing_retry(
        &self,
        failed_before: DateTime<Utc>,
    ) -> Result<Vec<Contract>, RepositoryError>;

    /// Contracts whose (exclusive) end date is `end_date`.
    async fn find_ending_on(&self, end_date: NaiveDate) -> Result<Vec<Contract>, RepositoryError>;

    /// Optimistic save, as [`OrderRepository::save`].
    async fn save(&self, contract: &Contract) -> Result<Contract, RepositoryError>;

    /// Store a successful charge and the advanced contract in one transaction.
    async fn record_charge(
        &self,
        contract: &Contract,
        payment: NewPayment,
    ) -> Result<(Contract, Payment), RepositoryError>;

    async fn template_for_place(
        &self,
        place: PlaceId,
    ) -> Result<Option<ContractTemplateId>, RepositoryError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Payments on the landlord's units, paid within `period`, not yet invoiced.
    async fn unbilled_for_landlord(
        &self,
        landlord: UserId,
        period: BillingPeriod,
    ) -> Result<Vec<BillablePayment>, RepositoryError>;

    async fn list_for_invoice(&self, invoice: InvoiceId) -> Result<Vec<Payment>, RepositoryError>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn find(
        &self,
        landlord: UserId,
        period: BillingPeriod,
    ) -> Result<Option<SelfBillingInvoice>, RepositoryError>;

    /// Number and insert the invoice, marking its payments billed.
    ///
    /// The landlord's next sequence is taken inside the same transaction.
    async fn create(&self, draft: InvoiceDraft) -> Result<InvoiceCreation, RepositoryError>;

    async fn list_for_landlord(
        &self,
        landlord: UserId,
    ) -> Result<Vec<SelfBillingInvoice>, RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError>;

    async fn list_landlords(&self) -> Result<Vec<User>, RepositoryError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn enqueue(&self, envelope: &EventEnvelope, error: &str)
    -> Result<(), RepositoryError>;

    /// Undispatched entries, oldest first.
    async fn pending(&self, limit: i64) -> Result<Vec<OutboxEntry>, RepositoryError>;

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), RepositoryError>;
}

/// All repositories behind their traits.
#[derive(Clone)]
pub struct Repositories {
    pub orders: Arc<dyn OrderRepository>,
    pub contracts: Arc<dyn ContractRepository>,
    pub storages: Arc<dyn StorageRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub invoices: Arc<dyn InvoiceRepository>,
    pub users: Arc<dyn UserRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
}

impl Repositories {
    /// Repositories backed by `PostgreSQL`.
    #[must_use]
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            orders: Arc::new(PgOrderRepository::new(pool.clone())),
            contracts: Arc::new(PgContractRepository::new(pool.clone())),
            storages: Arc::new(PgStorageRepository::new(pool.clone())),
            payments: Arc::new(PgPaymentRepository::new(pool.clone())),
            invoices: Arc::new(PgInvoiceRepository::new(pool.clone())),
            users: Arc::new(PgUserRepository::new(pool.clone())),
            outbox: Arc::new(PgOutboxRepository::new(pool.clone())),
        }
    }

    /// Repositories sharing one in-memory store.
    #[must_use]
    pub fn in_memory(store: &Arc<InMemoryStore>) -> Self {
        Self {
            orders: store.clone(),
            contracts: store.clone(),
            storages: store.clone(),
            payments: store.clone(),
            invoices: store.clone(),
            users: store.clone(),
            outbox: store.clone(),
        }
    }
}
