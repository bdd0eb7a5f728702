//! Monthly self-billing invoices.

#![allow(clippy::unwrap_used)]

use boxrent_core::domain::Storage;
use boxrent_core::{BillingPeriod, Money, StorageId, StorageStatus, UserId};
use boxrent_integration_tests::{
    CUSTOMER, LANDLORD, OTHER_CUSTOMER, PLACE, SMALL_BOX, World, at, date, landlord, rate,
};
use boxrent_service::error::AppError;
use boxrent_service::services::{InvoiceOutcome, SelfBillingService};

fn may() -> BillingPeriod {
    BillingPeriod::new(2026, 5).unwrap()
}

fn invoices(world: &World) -> SelfBillingService {
    SelfBillingService::new(world.ctx.clone())
}

/// A unit of the small box type owned by `owner`.
fn insert_unit(world: &World, id: i32, owner: UserId, commission: Option<&str>) -> StorageId {
    let id = StorageId::new(id);
    world.store.insert_storage(Storage {
        id,
        number: format!("L{id}"),
        coordinates: None,
        storage_type_id: SMALL_BOX,
        place_id: PLACE,
        owner_id: owner,
        status: StorageStatus::Available,
        commission_rate: commission.map(rate),
    });
    id
}

#[tokio::test]
async fn test_invoice_applies_landlord_commission() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;

    world.clock.set(at(6, 1));
    let outcome = invoices(&world).generate(LANDLORD, may()).await.unwrap();

    let InvoiceOutcome::Created(invoice) = outcome else {
        panic!("expected a new invoice, got {outcome:?}");
    };
    assert_eq!(invoice.number, "SB-2026-0001");
    assert_eq!(invoice.sequence, 1);
    assert_eq!(invoice.gross_amount, Money::from_minor(50_000));
    assert_eq!(invoice.net_amount, Money::from_minor(45_000));

    let payments = world.store.payments();
    assert!(payments.iter().all(|p| p.invoice_id == Some(invoice.id)));
    assert!(world.events.names().contains(&"self_billing_invoice_generated"));
}

#[tokio::test]
async fn test_regeneration_returns_existing_invoice() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;
    world.clock.set(at(6, 1));

    let first = invoices(&world).generate(LANDLORD, may()).await.unwrap();
    let second = invoices(&world).generate(LANDLORD, may()).await.unwrap();

    assert!(matches!(first, InvoiceOutcome::Created(_)));
    assert_eq!(second, InvoiceOutcome::Exists(first.invoice().clone()));

    let report = invoices(&world).generate_all(may()).await.unwrap();
    assert_eq!(report.succeeded, 0);
    assert!(
        report
            .lines
            .contains(&format!("[EXISTS] SB-2026-0001 landlord {LANDLORD}"))
    );
}

#[tokio::test]
async fn test_storage_commission_overrides_landlord_rate() {
    let world = World::at(at(5, 20));
    insert_unit(&world, 1, LANDLORD, Some("0.80"));
    world
        .rent(CUSTOMER, SMALL_BOX, date(5, 20), Some(date(7, 15)))
        .await;

    world.clock.set(at(6, 1));
    let outcome = invoices(&world).generate(LANDLORD, may()).await.unwrap();

    assert_eq!(outcome.invoice().gross_amount, Money::from_minor(100_000));
    assert_eq!(outcome.invoice().net_amount, Money::from_minor(80_000));
}

#[tokio::test]
async fn test_sequence_continues_per_landlord() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    world.add_unit(2, "A2");
    world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;

    world.clock.set(at(6, 1));
    invoices(&world).generate(LANDLORD, may()).await.unwrap();

    world.clock.set(at(6, 10));
    world
        .rent(OTHER_CUSTOMER, SMALL_BOX, date(6, 10), Some(date(7, 10)))
        .await;

    world.clock.set(at(7, 1));
    let june = BillingPeriod::new(2026, 6).unwrap();
    let outcome = invoices(&world).generate(LANDLORD, june).await.unwrap();

    assert_eq!(outcome.invoice().number, "SB-2026-0002");
    assert_eq!(outcome.invoice().gross_amount, Money::from_minor(50_000));
}

#[tokio::test]
async fn test_batch_invoices_every_configured_landlord() {
    let world = World::at(at(5, 20));
    let second = UserId::new(5);
    let manual = UserId::new(6);
    world.store.insert_user(landlord(second, Some("XY"), "0.85"));
    world.store.insert_user(landlord(manual, None, "0.90"));

    world.add_unit(1, "A1");
    insert_unit(&world, 2, second, None);
    world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;
    world
        .rent(OTHER_CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;

    world.clock.set(at(6, 1));
    let report = invoices(&world).generate_all(may()).await.unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.skipped, 1);
    assert!(!report.has_failures());
    assert!(
        report
            .lines
            .contains(&format!("[NEW] SB-2026-0001 landlord {LANDLORD}: gross 500.00, net 450.00"))
    );
    assert!(
        report
            .lines
            .contains(&format!("[NEW] XY-2026-0001 landlord {second}: gross 500.00, net 425.00"))
    );
    assert!(
        report
            .lines
            .iter()
            .any(|line| line.starts_with(&format!("[SKIP] landlord {manual}")))
    );
}

#[tokio::test]
async fn test_nothing_to_bill() {
    let world = World::at(at(6, 1));

    let empty = invoices(&world).generate(LANDLORD, may()).await;
    assert!(matches!(empty, Err(AppError::NoPaymentsForPeriod { .. })));

    let report = invoices(&world).generate_all(may()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(!report.has_failures());

    let not_landlord = invoices(&world).generate(CUSTOMER, may()).await;
    assert!(matches!(not_landlord, Err(AppError::NotFound(_))));
}
