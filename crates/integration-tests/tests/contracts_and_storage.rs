//! Contract termination, expiration reminders and storage administration.

#![allow(clippy::unwrap_used)]

use boxrent_core::access::Actor;
use boxrent_core::domain::{Place, StorageType};
use boxrent_core::{
    DomainError, DomainEvent, Money, PlaceId, RentalPeriod, StorageId, StorageStatus,
    StorageTypeId, UnavailabilityId,
};
use boxrent_integration_tests::{
    ADMIN, CUSTOMER, LANDLORD, OTHER_CUSTOMER, PLACE, SMALL_BOX, World, actor, at, date,
    landlord_actor,
};
use boxrent_service::error::AppError;
use boxrent_service::services::{
    AvailabilityService, ContractService, RecurringBillingService, ReminderService,
    StorageAdminService,
};
use chrono::Duration;

fn admin(world: &World) -> StorageAdminService {
    StorageAdminService::new(world.ctx.clone())
}

fn contracts(world: &World) -> ContractService {
    ContractService::new(world.ctx.clone())
}

async fn free_units(world: &World, start: chrono::NaiveDate, end: chrono::NaiveDate) -> usize {
    AvailabilityService::new(world.ctx.clone())
        .count_available(SMALL_BOX, None, RentalPeriod::new(start, Some(end)))
        .await
        .unwrap()
}

// =============================================================================
// Termination
// =============================================================================

#[tokio::test]
async fn test_termination_ends_at_paid_period_and_voids_recurrence() {
    let world = World::at(at(5, 20));
    let unit = world.add_unit(1, "A1");
    let contract = world.rent(CUSTOMER, SMALL_BOX, date(6, 1), None).await;
    let parent = contract.recurring.as_ref().unwrap().parent_payment_id;

    world.clock.set(at(6, 10));
    let terminated = contracts(&world)
        .terminate_contract(contract.id, &actor(CUSTOMER))
        .await
        .unwrap();

    assert_eq!(terminated.period.end, Some(date(7, 1)));
    assert_eq!(terminated.terminated_at, Some(at(6, 10)));
    assert!(terminated.active_recurring().is_none());
    assert_eq!(world.gateway.voided(), vec![parent]);
    assert!(world.events.events().iter().any(|event| matches!(
        event,
        DomainEvent::ContractTerminated { contract_id, end_date }
            if *contract_id == contract.id && *end_date == date(7, 1)
    )));

    // Nothing left to charge, and the unit frees up when the paid month ends
    world.clock.set(at(7, 1));
    let report = RecurringBillingService::new(world.ctx.clone())
        .process_due()
        .await
        .unwrap();
    assert!(report.lines.is_empty());

    let next = world
        .reserve(OTHER_CUSTOMER, SMALL_BOX, date(7, 1), Some(date(8, 1)))
        .await
        .unwrap();
    assert_eq!(next.storage_id, unit);
}

#[tokio::test]
async fn test_termination_is_rejected_when_not_allowed() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    world.add_unit(2, "A2");
    let open_ended = world.rent(CUSTOMER, SMALL_BOX, date(6, 1), None).await;
    let limited = world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(9, 1)))
        .await;

    let stranger = contracts(&world)
        .terminate_contract(open_ended.id, &actor(OTHER_CUSTOMER))
        .await;
    assert!(matches!(stranger, Err(AppError::Forbidden(_))));

    let landlord = contracts(&world)
        .terminate_contract(open_ended.id, &landlord_actor(LANDLORD))
        .await;
    assert!(matches!(landlord, Err(AppError::Forbidden(_))));

    let fixed_term = contracts(&world)
        .terminate_contract(limited.id, &actor(CUSTOMER))
        .await;
    assert!(matches!(
        fixed_term,
        Err(AppError::Domain(DomainError::NotTerminable(_)))
    ));

    contracts(&world)
        .terminate_contract(open_ended.id, &actor(CUSTOMER))
        .await
        .unwrap();
    let twice = contracts(&world)
        .terminate_contract(open_ended.id, &actor(CUSTOMER))
        .await;
    assert!(matches!(
        twice,
        Err(AppError::Domain(DomainError::AlreadyTerminated(_)))
    ));
    assert_eq!(world.gateway.voided().len(), 1);
}

#[tokio::test]
async fn test_failed_void_does_not_undo_termination() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    let contract = world.rent(CUSTOMER, SMALL_BOX, date(6, 1), None).await;
    world.gateway.fail_void(true);

    let terminated = contracts(&world)
        .terminate_contract(contract.id, &actor(CUSTOMER))
        .await
        .unwrap();

    assert!(terminated.terminated_at.is_some());
    assert!(world.gateway.voided().is_empty());
    assert!(world.contract(contract.id).await.terminated_at.is_some());
}

// =============================================================================
// Reminders
// =============================================================================

#[tokio::test]
async fn test_reminders_a_week_and_a_day_before_end() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    let contract = world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;
    let reminders = ReminderService::new(world.ctx.clone());

    world.clock.set(at(6, 24));
    let week = reminders.send_expiration_reminders().await.unwrap();
    assert_eq!(
        week.lines,
        vec![format!(
            "[REMINDED] contract {} ends 2026-07-01 (7 days)",
            contract.id
        )]
    );

    world.clock.set(at(6, 25));
    assert!(reminders.send_expiration_reminders().await.unwrap().lines.is_empty());

    world.clock.set(at(6, 30));
    let day = reminders.send_expiration_reminders().await.unwrap();
    assert_eq!(day.succeeded, 1);
    assert!(world.events.events().iter().any(|event| matches!(
        event,
        DomainEvent::ContractExpiringSoon { days_left: 1, .. }
    )));
}

// =============================================================================
// Storage administration
// =============================================================================

#[tokio::test]
async fn test_block_hides_unit_until_removed() {
    let world = World::at(at(5, 20));
    let unit = world.add_unit(1, "A1");

    let block = admin(&world)
        .block_storage(
            unit,
            date(5, 20),
            Some(date(6, 15)),
            "repainting",
            &landlord_actor(LANDLORD),
        )
        .await
        .unwrap();

    assert_eq!(free_units(&world, date(6, 1), date(7, 1)).await, 0);
    assert_eq!(free_units(&world, date(6, 15), date(7, 15)).await, 1);
    let blocked = world
        .reserve(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;
    assert!(matches!(blocked, Err(AppError::NoStorageAvailable)));

    let status = AvailabilityService::new(world.ctx.clone())
        .refresh_storage_status(unit)
        .await
        .unwrap();
    assert_eq!(status, StorageStatus::ManuallyUnavailable);

    let wrong = admin(&world)
        .unblock_storage(unit, UnavailabilityId::new(999), &landlord_actor(LANDLORD))
        .await;
    assert!(matches!(wrong, Err(AppError::NotFound(_))));

    admin(&world)
        .unblock_storage(unit, block.id, &landlord_actor(LANDLORD))
        .await
        .unwrap();
    assert_eq!(free_units(&world, date(6, 1), date(7, 1)).await, 1);
}

async fn cached_status(world: &World, id: StorageId) -> StorageStatus {
    world
        .ctx
        .repos
        .storages
        .get(id)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn test_daily_sweep_follows_rentals_and_blocks_over_time() {
    let world = World::at(at(5, 20));
    let rented = world.add_unit(1, "A1");
    let blocked = world.add_unit(2, "A2");
    world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;
    admin(&world)
        .block_storage(
            blocked,
            date(6, 10),
            Some(date(6, 20)),
            "new door",
            &landlord_actor(LANDLORD),
        )
        .await
        .unwrap();
    let statuses = AvailabilityService::new(world.ctx.clone());

    assert!(statuses.refresh_storage_statuses().await.unwrap().lines.is_empty());
    assert_eq!(cached_status(&world, rented).await, StorageStatus::Available);

    world.clock.set(at(6, 1));
    assert_eq!(
        statuses.refresh_storage_statuses().await.unwrap().lines,
        vec![format!("[UPDATED] storage {rented} (A1): available -> occupied")]
    );
    assert_eq!(cached_status(&world, rented).await, StorageStatus::Occupied);

    world.clock.set(at(6, 10));
    let report = statuses.refresh_storage_statuses().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(
        cached_status(&world, blocked).await,
        StorageStatus::ManuallyUnavailable
    );

    world.clock.set(at(6, 20));
    statuses.refresh_storage_statuses().await.unwrap();
    assert_eq!(cached_status(&world, blocked).await, StorageStatus::Available);

    world.clock.set(at(7, 1));
    assert_eq!(
        statuses.refresh_storage_statuses().await.unwrap().lines,
        vec![format!("[UPDATED] storage {rented} (A1): occupied -> available")]
    );
    assert_eq!(cached_status(&world, rented).await, StorageStatus::Available);
    assert!(statuses.refresh_storage_statuses().await.unwrap().lines.is_empty());
}

#[tokio::test]
async fn test_block_requires_owner_and_valid_range() {
    let world = World::at(at(5, 20));
    let unit = world.add_unit(1, "A1");

    let customer = admin(&world)
        .block_storage(unit, date(6, 1), None, "mine now", &actor(CUSTOMER))
        .await;
    assert!(matches!(customer, Err(AppError::Forbidden(_))));

    let backwards = admin(&world)
        .block_storage(
            unit,
            date(6, 1),
            Some(date(6, 1)),
            "zero days",
            &landlord_actor(LANDLORD),
        )
        .await;
    assert!(matches!(backwards, Err(AppError::BadRequest(_))));

    let by_admin = admin(&world)
        .block_storage(
            unit,
            date(6, 1),
            None,
            "closed",
            &Actor {
                id: ADMIN,
                is_admin: true,
                is_landlord: false,
            },
        )
        .await;
    assert!(by_admin.is_ok());
}

#[tokio::test]
async fn test_unit_with_future_claim_cannot_be_deleted() {
    let world = World::at(at(5, 20));
    let unit = world.add_unit(1, "A1");
    world
        .reserve(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await
        .unwrap();

    let held = admin(&world)
        .delete_storage(unit, &landlord_actor(LANDLORD))
        .await;
    assert!(matches!(held, Err(AppError::StorageCannotBeDeleted(_))));

    world.clock.advance(Duration::hours(2));
    world.orders().expire_overdue_orders().await.unwrap();

    admin(&world)
        .delete_storage(unit, &landlord_actor(LANDLORD))
        .await
        .unwrap();
    let gone = world
        .reserve(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;
    assert!(matches!(gone, Err(AppError::NoStorageAvailable)));
}

#[tokio::test]
async fn test_storage_type_change_rules() {
    let world = World::at(at(5, 20));
    let rented = world.add_unit(1, "A1");
    let spare = world.add_unit(2, "A2");
    world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await;

    let large = StorageTypeId::new(2);
    world.store.insert_storage_type(StorageType {
        id: large,
        place_id: PLACE,
        name: "Large box".to_string(),
        dimensions: None,
        price_per_month: Money::from_minor(90_000),
    });
    let elsewhere = StorageTypeId::new(3);
    world.store.insert_place(Place {
        id: PlaceId::new(2),
        owner_id: LANDLORD,
        name: "Karlín".to_string(),
        address: "Sokolovská 2, Praha".to_string(),
    });
    world.store.insert_storage_type(StorageType {
        id: elsewhere,
        place_id: PlaceId::new(2),
        name: "Small box".to_string(),
        dimensions: None,
        price_per_month: Money::from_minor(50_000),
    });

    let busy = admin(&world)
        .change_storage_type(rented, large, &landlord_actor(LANDLORD))
        .await;
    assert!(matches!(busy, Err(AppError::StorageCannotBeReassigned(_))));

    let other_place = admin(&world)
        .change_storage_type(spare, elsewhere, &landlord_actor(LANDLORD))
        .await;
    assert!(matches!(
        other_place,
        Err(AppError::StorageCannotBeReassigned(_))
    ));

    let moved = admin(&world)
        .change_storage_type(spare, large, &landlord_actor(LANDLORD))
        .await
        .unwrap();
    assert_eq!(moved.storage_type_id, large);
    assert_eq!(free_units(&world, date(6, 1), date(7, 1)).await, 0);
}
