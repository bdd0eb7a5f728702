//! In-memory implementation of every repository trait.
//!
//! One mutex guards all tables, so each trait method is atomic the way a
//! single `PostgreSQL` transaction is. Used by the integration tests and for
//! running the services without a database.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use boxrent_core::availability;
use boxrent_core::domain::{
    BillablePayment, Contract, InvoiceDraft, NewContract, NewOrder, NewPayment, Order, Payment,
    PaymentLink, Place, SelfBillingInvoice, Storage, StorageOccupancy, StorageType,
    UnavailabilityBlock, User,
};
use boxrent_core::{
    BillingPeriod, ContractId, ContractTemplateId, EventEnvelope, GatewayPaymentId, InvoiceId,
    OrderId, PaymentId, PlaceId, RentalPeriod, StorageId, StorageStatus, StorageTypeId,
    UnavailabilityId, UserId,
};

use crate::db::RepositoryError;
use crate::repository::{
    CompletedOrder, ContractRepository, InvoiceCreation, InvoiceRepository, OrderRepository,
    OutboxEntry, OutboxRepository, PaymentRepository, StorageRepository, UserRepository,
};

#[derive(Debug, Clone)]
struct StoredStorage {
    storage: Storage,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    entry: OutboxEntry,
    dispatched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    places: BTreeMap<PlaceId, Place>,
    storage_types: BTreeMap<StorageTypeId, StorageType>,
    storages: BTreeMap<StorageId, StoredStorage>,
    blocks: BTreeMap<UnavailabilityId, UnavailabilityBlock>,
    templates: BTreeMap<ContractTemplateId, PlaceId>,
    orders: BTreeMap<OrderId, Order>,
    contracts: BTreeMap<ContractId, Contract>,
    payments: BTreeMap<PaymentId, Payment>,
    invoices: BTreeMap<InvoiceId, SelfBillingInvoice>,
    /// Insertion order doubles as `created_at` ordering.
    outbox: Vec<StoredEvent>,
}

/// Next serial value for a table keyed by an `i32` id.
fn next_serial<K, V>(table: &BTreeMap<K, V>, as_i32: impl Fn(&K) -> i32) -> i32 {
    table.keys().next_back().map_or(1, |id| as_i32(id) + 1)
}

impl Tables {
    fn live_storage(&self, id: StorageId) -> Option<&Storage> {
        self.storages
            .get(&id)
            .filter(|stored| !stored.deleted)
            .map(|stored| &stored.storage)
    }

    fn occupancy_of(&self, storage: &Storage) -> StorageOccupancy {
        let order_claims = self
            .orders
            .values()
            .filter(|order| order.storage_id == storage.id)
            .filter_map(Order::claim);
        let contract_claims = self
            .contracts
            .values()
            .filter(|contract| contract.storage_id == storage.id)
            .map(Contract::claim);

        StorageOccupancy {
            storage: storage.clone(),
            claims: order_claims.chain(contract_claims).collect(),
            blocks: self
                .blocks
                .values()
                .filter(|block| block.storage_id == storage.id)
                .cloned()
                .collect(),
        }
    }

    fn occupancies_of_type(
        &self,
        storage_type: StorageTypeId,
        place: Option<PlaceId>,
    ) -> Vec<StorageOccupancy> {
        let mut storages: Vec<&Storage> = self
            .storages
            .values()
            .filter(|stored| !stored.deleted)
            .map(|stored| &stored.storage)
            .filter(|storage| storage.storage_type_id == storage_type)
            .filter(|storage| place.is_none_or(|place| storage.place_id == place))
            .collect();
        storages.sort_by(|a, b| availability::compare_units(a, b));
        storages
            .into_iter()
            .map(|storage| self.occupancy_of(storage))
            .collect()
    }

    fn locked_occupancy(
        &self,
        id: StorageId,
        today: NaiveDate,
    ) -> Result<StorageOccupancy, RepositoryError> {
        let storage = self.live_storage(id).ok_or(RepositoryError::NotFound)?;
        let occupancy = self.occupancy_of(storage);
        if availability::has_claims_after(&occupancy, today) {
            return Err(RepositoryError::Conflict(format!(
                "storage {id} has rentals after {today}"
            )));
        }
        Ok(occupancy)
    }

    fn storage_of_link(&self, link: PaymentLink) -> Option<&Storage> {
        let storage_id = match link {
            PaymentLink::Order(id) => self.orders.get(&id)?.storage_id,
            PaymentLink::Contract(id) => self.contracts.get(&id)?.storage_id,
        };
        self.storages.get(&storage_id).map(|stored| &stored.storage)
    }

    fn check_order_version(&self, order: &Order) -> Result<(), RepositoryError> {
        let stored = self.orders.get(&order.id).ok_or(RepositoryError::NotFound)?;
        if stored.version != order.version {
            return Err(RepositoryError::stale("order", order.id));
        }
        if let Some(payment_id) = order.gateway_payment_id
            && self
                .orders
                .values()
                .any(|other| other.id != order.id && other.gateway_payment_id == Some(payment_id))
        {
            return Err(RepositoryError::Conflict(format!(
                "order: gateway payment {payment_id} is already linked"
            )));
        }
        Ok(())
    }

    fn check_contract_version(&self, contract: &Contract) -> Result<(), RepositoryError> {
        let stored = self
            .contracts
            .get(&contract.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != contract.version {
            return Err(RepositoryError::stale("contract", contract.id));
        }
        Ok(())
    }

    fn check_new_contract(&self, contract: &NewContract) -> Result<(), RepositoryError> {
        if self
            .contracts
            .values()
            .any(|existing| existing.order_id == contract.order_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "contract: order {} already has a contract",
                contract.order_id
            )));
        }
        if self.contracts.values().any(|existing| {
            existing.storage_id == contract.storage_id && existing.period.overlaps(&contract.period)
        }) {
            return Err(RepositoryError::Conflict(format!(
                "contract: storage {} is already contracted for {}",
                contract.storage_id, contract.period
            )));
        }
        Ok(())
    }

    fn check_new_payment(&self, payment: &NewPayment) -> Result<(), RepositoryError> {
        if let Some(gateway_id) = payment.gateway_payment_id
            && self
                .payments
                .values()
                .any(|existing| existing.gateway_payment_id == Some(gateway_id))
        {
            return Err(RepositoryError::Conflict(format!(
                "payment: gateway payment {gateway_id} is already recorded"
            )));
        }
        Ok(())
    }

    fn insert_payment(&mut self, payment: NewPayment) -> Payment {
        let id = PaymentId::new(next_serial(&self.payments, PaymentId::as_i32));
        let payment = payment.into_payment(id);
        self.payments.insert(id, payment.clone());
        payment
    }

    fn bump_order(&mut self, order: &Order) -> Order {
        let mut saved = order.clone();
        saved.version += 1;
        self.orders.insert(saved.id, saved.clone());
        saved
    }

    fn bump_contract(&mut self, contract: &Contract) -> Contract {
        let mut saved = contract.clone();
        saved.version += 1;
        self.contracts.insert(saved.id, saved.clone());
        saved
    }
}

/// Shared in-memory tables.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_user(&self, user: User) {
        self.tables().users.insert(user.id, user);
    }

    pub fn insert_place(&self, place: Place) {
        self.tables().places.insert(place.id, place);
    }

    pub fn insert_storage_type(&self, storage_type: StorageType) {
        self.tables()
            .storage_types
            .insert(storage_type.id, storage_type);
    }

    pub fn insert_storage(&self, storage: Storage) {
        self.tables().storages.insert(
            storage.id,
            StoredStorage {
                storage,
                deleted: false,
            },
        );
    }

    /// Register a contract template for `place`, returning its id.
    pub fn insert_template(&self, place: PlaceId) -> ContractTemplateId {
        let mut tables = self.tables();
        let id = ContractTemplateId::new(next_serial(&tables.templates, ContractTemplateId::as_i32));
        tables.templates.insert(id, place);
        id
    }

    /// Every payment, billed or not, in id order.
    #[must_use]
    pub fn payments(&self) -> Vec<Payment> {
        self.tables().payments.values().cloned().collect()
    }
}

#[async_trait]
impl StorageRepository for InMemoryStore {
    async fn get(&self, id: StorageId) -> Result<Option<Storage>, RepositoryError> {
        Ok(self.tables().live_storage(id).cloned())
    }

    async fn get_type(&self, id: StorageTypeId) -> Result<Option<StorageType>, RepositoryError> {
        Ok(self.tables().storage_types.get(&id).cloned())
    }

    async fn occupancies(
        &self,
        storage_type: StorageTypeId,
        place: Option<PlaceId>,
    ) -> Result<Vec<StorageOccupancy>, RepositoryError> {
        Ok(self.tables().occupancies_of_type(storage_type, place))
    }

    async fn occupancy(&self, id: StorageId) -> Result<Option<StorageOccupancy>, RepositoryError> {
        let tables = self.tables();
        Ok(tables
            .live_storage(id)
            .map(|storage| tables.occupancy_of(storage)))
    }

    async fn all_occupancies(&self) -> Result<Vec<StorageOccupancy>, RepositoryError> {
        let tables = self.tables();
        Ok(tables
            .storages
            .values()
            .filter(|stored| !stored.deleted)
            .map(|stored| tables.occupancy_of(&stored.storage))
            .collect())
    }

    async fn reserve_first_available(
        &self,
        order: NewOrder,
    ) -> Result<Option<(Storage, Order)>, RepositoryError> {
        let mut tables = self.tables();
        let occupancies = tables.occupancies_of_type(order.storage_type_id, order.place_id);
        let Some(storage) = availability::first_available(&occupancies, &order.period).cloned()
        else {
            return Ok(None);
        };

        let id = OrderId::new(next_serial(&tables.orders, OrderId::as_i32));
        let order = order.into_reserved(id, storage.id);
        tables.orders.insert(id, order.clone());
        Ok(Some((storage, order)))
    }

    async fn update_status(
        &self,
        id: StorageId,
        status: StorageStatus,
    ) -> Result<(), RepositoryError> {
        if let Some(stored) = self.tables().storages.get_mut(&id) {
            stored.storage.status = status;
        }
        Ok(())
    }

    async fn add_block(
        &self,
        storage_id: StorageId,
        period: RentalPeriod,
        reason: &str,
    ) -> Result<UnavailabilityBlock, RepositoryError> {
        let mut tables = self.tables();
        if !tables.storages.contains_key(&storage_id) {
            return Err(RepositoryError::NotFound);
        }
        let block = UnavailabilityBlock {
            id: UnavailabilityId::new(next_serial(&tables.blocks, UnavailabilityId::as_i32)),
            storage_id,
            period,
            reason: reason.to_owned(),
        };
        tables.blocks.insert(block.id, block.clone());
        Ok(block)
    }

    async fn remove_block(
        &self,
        id: UnavailabilityId,
    ) -> Result<Option<UnavailabilityBlock>, RepositoryError> {
        Ok(self.tables().blocks.remove(&id))
    }

    async fn delete(&self, id: StorageId, today: NaiveDate) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        tables.locked_occupancy(id, today)?;
        if let Some(stored) = tables.storages.get_mut(&id) {
            stored.deleted = true;
        }
        Ok(())
    }

    async fn change_type(
        &self,
        id: StorageId,
        storage_type: StorageTypeId,
        today: NaiveDate,
    ) -> Result<Storage, RepositoryError> {
        let mut tables = self.tables();
        let occupancy = tables.locked_occupancy(id, today)?;
        let new_type = tables
            .storage_types
            .get(&storage_type)
            .ok_or(RepositoryError::NotFound)?;
        if new_type.place_id != occupancy.storage.place_id {
            return Err(RepositoryError::Conflict(format!(
                "storage type {storage_type} belongs to another place"
            )));
        }

        let stored = tables
            .storages
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        stored.storage.storage_type_id = storage_type;
        Ok(stored.storage.clone())
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables().orders.get(&id).cloned())
    }

    async fn find_by_gateway_payment(
        &self,
        payment_id: GatewayPaymentId,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .tables()
            .orders
            .values()
            .find(|order| order.gateway_payment_id == Some(payment_id))
            .cloned())
    }

    async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Order>, RepositoryError> {
        let mut overdue: Vec<Order> = self
            .tables()
            .orders
            .values()
            .filter(|order| order.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|order| (order.expires_at, order.id));
        Ok(overdue)
    }

    async fn save(&self, order: &Order) -> Result<Order, RepositoryError> {
        let mut tables = self.tables();
        tables.check_order_version(order)?;
        Ok(tables.bump_order(order))
    }

    async fn complete(
        &self,
        order: &Order,
        contract: NewContract,
        payment: NewPayment,
    ) -> Result<CompletedOrder, RepositoryError> {
        let mut tables = self.tables();
        tables.check_order_version(order)?;
        tables.check_new_contract(&contract)?;
        tables.check_new_payment(&payment)?;

        let order = tables.bump_order(order);
        let contract_id = ContractId::new(next_serial(&tables.contracts, ContractId::as_i32));
        let contract = contract.into_contract(contract_id);
        tables.contracts.insert(contract_id, contract.clone());
        let payment = tables.insert_payment(payment);

        Ok(CompletedOrder {
            order,
            contract,
            payment,
        })
    }
}

#[async_trait]
impl ContractRepository for InMemoryStore {
    async fn get(&self, id: ContractId) -> Result<Option<Contract>, RepositoryError> {
        Ok(self.tables().contracts.get(&id).cloned())
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Contract>, RepositoryError> {
        Ok(self
            .tables()
            .contracts
            .values()
            .find(|contract| contract.order_id == order_id)
            .cloned())
    }

    async fn find_due_for_billing(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<Contract>, RepositoryError> {
        let mut due: Vec<Contract> = self
            .tables()
            .contracts
            .values()
            .filter(|contract| contract.is_due_for_billing(today))
            .cloned()
            .collect();
        due.sort_by_key(|contract| {
            (
                contract.recurring.as_ref().map(|r| r.next_billing_date),
                contract.id,
            )
        });
        Ok(due)
    }

    async fn find_needing_retry(
        &self,
        failed_before: DateTime<Utc>,
    ) -> Result<Vec<Contract>, RepositoryError> {
        Ok(self
            .tables()
            .contracts
            .values()
            .filter(|contract| {
                contract.terminated_at.is_none()
                    && contract.active_recurring().is_some_and(|billing| {
                        billing.failed_attempts == 1
                            && billing
                                .last_failure_at
                                .is_some_and(|failed_at| failed_at <= failed_before)
                    })
            })
            .cloned()
            .collect())
    }

    async fn find_ending_on(&self, end_date: NaiveDate) -> Result<Vec<Contract>, RepositoryError> {
        Ok(self
            .tables()
            .contracts
            .values()
            .filter(|contract| contract.period.end == Some(end_date))
            .cloned()
            .collect())
    }

    async fn save(&self, contract: &Contract) -> Result<Contract, RepositoryError> {
        let mut tables = self.tables();
        tables.check_contract_version(contract)?;
        Ok(tables.bump_contract(contract))
    }

    async fn record_charge(
        &self,
        contract: &Contract,
        payment: NewPayment,
    ) -> Result<(Contract, Payment), RepositoryError> {
        let mut tables = self.tables();
        tables.check_contract_version(contract)?;
        tables.check_new_payment(&payment)?;
        let contract = tables.bump_contract(contract);
        let payment = tables.insert_payment(payment);
        Ok((contract, payment))
    }

    async fn template_for_place(
        &self,
        place: PlaceId,
    ) -> Result<Option<ContractTemplateId>, RepositoryError> {
        Ok(self
            .tables()
            .templates
            .iter()
            .rev()
            .find(|(_, template_place)| **template_place == place)
            .map(|(id, _)| *id))
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn unbilled_for_landlord(
        &self,
        landlord: UserId,
        period: BillingPeriod,
    ) -> Result<Vec<BillablePayment>, RepositoryError> {
        let tables = self.tables();
        let (from, until) = period.bounds();

        let mut billable: Vec<(DateTime<Utc>, BillablePayment)> = tables
            .payments
            .values()
            .filter(|payment| payment.invoice_id.is_none())
            .filter(|payment| payment.paid_at >= from && payment.paid_at < until)
            .filter_map(|payment| {
                let storage = tables.storage_of_link(payment.link)?;
                (storage.owner_id == landlord).then(|| {
                    (
                        payment.paid_at,
                        BillablePayment {
                            payment_id: payment.id,
                            amount: payment.amount,
                            storage_id: storage.id,
                            storage_commission_rate: storage.commission_rate,
                        },
                    )
                })
            })
            .collect();
        billable.sort_by_key(|(paid_at, payment)| (*paid_at, payment.payment_id));
        Ok(billable.into_iter().map(|(_, payment)| payment).collect())
    }

    async fn list_for_invoice(&self, invoice: InvoiceId) -> Result<Vec<Payment>, RepositoryError> {
        let mut payments: Vec<Payment> = self
            .tables()
            .payments
            .values()
            .filter(|payment| payment.invoice_id == Some(invoice))
            .cloned()
            .collect();
        payments.sort_by_key(|payment| (payment.paid_at, payment.id));
        Ok(payments)
    }
}

#[async_trait]
impl InvoiceRepository for InMemoryStore {
    async fn find(
        &self,
        landlord: UserId,
        period: BillingPeriod,
    ) -> Result<Option<SelfBillingInvoice>, RepositoryError> {
        Ok(self
            .tables()
            .invoices
            .values()
            .find(|invoice| invoice.landlord_id == landlord && invoice.period == period)
            .cloned())
    }

    async fn create(&self, draft: InvoiceDraft) -> Result<InvoiceCreation, RepositoryError> {
        let mut tables = self.tables();
        if !tables.users.contains_key(&draft.landlord_id) {
            return Err(RepositoryError::NotFound);
        }
        if let Some(existing) = tables
            .invoices
            .values()
            .find(|invoice| invoice.landlord_id == draft.landlord_id && invoice.period == draft.period)
        {
            return Ok(InvoiceCreation::Exists(existing.clone()));
        }
        if draft.payment_ids.iter().any(|id| {
            tables
                .payments
                .get(id)
                .is_none_or(|payment| payment.invoice_id.is_some())
        }) {
            return Err(RepositoryError::Conflict(format!(
                "payments for landlord {} were billed concurrently",
                draft.landlord_id
            )));
        }

        let sequence = tables
            .invoices
            .values()
            .filter(|invoice| invoice.landlord_id == draft.landlord_id)
            .map(|invoice| invoice.sequence)
            .max()
            .unwrap_or(0)
            + 1;
        let id = InvoiceId::new(next_serial(&tables.invoices, InvoiceId::as_i32));
        let payment_ids = draft.payment_ids.clone();
        let invoice = draft.into_invoice(id, sequence);

        for payment_id in payment_ids {
            if let Some(payment) = tables.payments.get_mut(&payment_id) {
                payment.invoice_id = Some(id);
            }
        }
        tables.invoices.insert(id, invoice.clone());
        Ok(InvoiceCreation::Created(invoice))
    }

    async fn list_for_landlord(
        &self,
        landlord: UserId,
    ) -> Result<Vec<SelfBillingInvoice>, RepositoryError> {
        let mut invoices: Vec<SelfBillingInvoice> = self
            .tables()
            .invoices
            .values()
            .filter(|invoice| invoice.landlord_id == landlord)
            .cloned()
            .collect();
        invoices.sort_by_key(|invoice| invoice.sequence);
        Ok(invoices)
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn list_landlords(&self) -> Result<Vec<User>, RepositoryError> {
        Ok(self
            .tables()
            .users
            .values()
            .filter(|user| user.is_landlord)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OutboxRepository for InMemoryStore {
    async fn enqueue(&self, envelope: &EventEnvelope, error: &str) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        if let Some(stored) = tables
            .outbox
            .iter_mut()
            .find(|stored| stored.entry.envelope.id == envelope.id)
        {
            stored.entry.attempts += 1;
            stored.entry.last_error = Some(error.to_owned());
            return Ok(());
        }
        tables.outbox.push(StoredEvent {
            entry: OutboxEntry {
                envelope: envelope.clone(),
                attempts: 1,
                last_error: Some(error.to_owned()),
            },
            dispatched_at: None,
        });
        Ok(())
    }

    async fn pending(&self, limit: i64) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .tables()
            .outbox
            .iter()
            .filter(|stored| stored.dispatched_at.is_none())
            .take(limit)
            .map(|stored| stored.entry.clone())
            .collect())
    }

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut tables = self.tables();
        let stored = tables
            .outbox
            .iter_mut()
            .find(|stored| stored.entry.envelope.id == id)
            .ok_or(RepositoryError::NotFound)?;
        stored.dispatched_at = Some(at);
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), RepositoryError> {
        if let Some(stored) = self
            .tables()
            .outbox
            .iter_mut()
            .find(|stored| stored.entry.envelope.id == id)
        {
            stored.entry.attempts += 1;
            stored.entry.last_error = Some(error.to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use boxrent_core::{Money, PaymentFrequency, RentalType};
    use chrono::TimeZone;

    use super::*;

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, m, d).unwrap()
    }

    fn store_with_units(numbers: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for (i, number) in numbers.iter().enumerate() {
            store.insert_storage(Storage {
                id: StorageId::new(i32::try_from(i).unwrap() + 1),
                number: (*number).to_owned(),
                coordinates: None,
                storage_type_id: StorageTypeId::new(1),
                place_id: PlaceId::new(1),
                owner_id: UserId::new(1),
                status: StorageStatus::Available,
                commission_rate: None,
            });
        }
        store
    }

    fn new_order(start: NaiveDate, end: NaiveDate) -> NewOrder {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        NewOrder {
            user_id: UserId::new(7),
            storage_type_id: StorageTypeId::new(1),
            place_id: None,
            rental_type: RentalType::Limited,
            payment_frequency: PaymentFrequency::Monthly,
            period: RentalPeriod::new(start, Some(end)),
            total_price: Money::from_minor(1000),
            expires_at: now + chrono::Duration::hours(1),
            signature: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_reserve_picks_lowest_number_then_runs_out() {
        let store = store_with_units(&["B2", "A1"]);
        let order = new_order(date(6, 1), date(7, 1));

        let (first, _) = store
            .reserve_first_available(order.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.number, "A1");

        let (second, _) = store
            .reserve_first_available(order.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.number, "B2");

        assert!(store.reserve_first_available(order).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_order_save_is_rejected() {
        let store = store_with_units(&["A1"]);
        let (_, order) = store
            .reserve_first_available(new_order(date(6, 1), date(7, 1)))
            .await
            .unwrap()
            .unwrap();

        let saved = OrderRepository::save(&store, &order).await.unwrap();
        assert_eq!(saved.version, order.version + 1);
        let err = OrderRepository::save(&store, &order).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_outbox_pending_skips_dispatched() {
        let store = InMemoryStore::new();
        let at = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let first = EventEnvelope::new(
            boxrent_core::DomainEvent::OrderExpired {
                order_id: OrderId::new(1),
                storage_id: StorageId::new(1),
            },
            at,
        );
        let second = EventEnvelope::new(
            boxrent_core::DomainEvent::OrderCancelled {
                order_id: OrderId::new(2),
                storage_id: StorageId::new(1),
            },
            at,
        );
        store.enqueue(&first, "channel full").await.unwrap();
        store.enqueue(&second, "channel full").await.unwrap();
        store.enqueue(&first, "channel closed").await.unwrap();

        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].attempts, 2);
        assert_eq!(pending[0].last_error.as_deref(), Some("channel closed"));

        store.mark_dispatched(first.id, at).await.unwrap();
        let pending = store.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].envelope.id, second.id);
    }
}
