//! Recurring charges against the GoPay parent payment.

#![allow(clippy::unwrap_used)]

use boxrent_core::domain::{Contract, PaymentLink};
use boxrent_core::DomainEvent;
use boxrent_integration_tests::{CUSTOMER, SMALL_BOX, SMALL_BOX_PRICE, World, at, date};
use boxrent_service::gopay::{GoPayError, GoPayPaymentStatus};
use boxrent_service::services::{RecurringBillingService, TransientFailurePolicy};

async fn rented_world() -> (World, Contract) {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    let contract = world.rent(CUSTOMER, SMALL_BOX, date(6, 1), None).await;
    (world, contract)
}

fn billing(world: &World) -> RecurringBillingService {
    RecurringBillingService::new(world.ctx.clone())
}

#[tokio::test]
async fn test_due_contract_is_charged_and_advanced() {
    let (world, contract) = rented_world().await;

    // Not due yet
    world.clock.set(at(6, 30));
    let early = billing(&world).process_due().await.unwrap();
    assert!(early.lines.is_empty());

    world.clock.set(at(7, 1));
    let report = billing(&world).process_due().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(
        report.lines,
        vec![format!(
            "[CHARGED] contract {}: 500.00, next charge 2026-08-01",
            contract.id
        )]
    );

    let calls = world.gateway.recurrence_calls();
    assert_eq!(calls.len(), 1);
    let parent = contract.recurring.as_ref().unwrap().parent_payment_id;
    assert_eq!(calls[0].0, parent);
    assert_eq!(calls[0].1.order_number, format!("C{}-20260701", contract.id));
    assert_eq!(calls[0].1.amount, SMALL_BOX_PRICE);

    let updated = world.contract(contract.id).await;
    assert_eq!(updated.recurring.unwrap().next_billing_date, date(8, 1));

    let payments = world.store.payments();
    assert_eq!(payments.len(), 2);
    assert!(
        payments
            .iter()
            .any(|payment| payment.link == PaymentLink::Contract(contract.id))
    );
    assert!(world.events.names().contains(&"recurring_charge_succeeded"));

    // Same day again: already advanced
    let again = billing(&world).process_due().await.unwrap();
    assert_eq!(again.succeeded, 0);
    assert_eq!(world.gateway.recurrence_calls().len(), 1);
}

#[tokio::test]
async fn test_second_failure_voids_recurrence() {
    let (world, contract) = rented_world().await;
    let parent = contract.recurring.as_ref().unwrap().parent_payment_id;
    world.gateway.script_recurrence(Ok(GoPayPaymentStatus::Canceled));
    world.gateway.script_recurrence(Ok(GoPayPaymentStatus::Canceled));

    world.clock.set(at(7, 1));
    let first = billing(&world).process_due().await.unwrap();
    assert_eq!(first.failed, 1);
    assert!(first.lines[0].starts_with(&format!("[FAILED] contract {}", contract.id)));
    assert!(first.lines[0].ends_with("retry in 3 days"));

    let struck = world.contract(contract.id).await.recurring.unwrap();
    assert_eq!(struck.failed_attempts, 1);
    assert!(struck.active);

    // A failed contract leaves the due list and waits for its retry
    world.clock.set(at(7, 2));
    assert!(billing(&world).process_due().await.unwrap().lines.is_empty());
    assert!(billing(&world).retry_failed().await.unwrap().lines.is_empty());

    world.clock.set(at(7, 4));
    let retry = billing(&world).retry_failed().await.unwrap();
    assert_eq!(retry.failed, 1);
    assert!(retry.lines[0].starts_with(&format!("[CANCELLED] contract {}", contract.id)));

    let stopped = world.contract(contract.id).await.recurring.unwrap();
    assert_eq!(stopped.failed_attempts, 2);
    assert!(!stopped.active);
    assert_eq!(world.gateway.voided(), vec![parent]);
    assert!(world.events.events().iter().any(|event| matches!(
        event,
        DomainEvent::RecurringChargeFailed { attempt: 2, .. }
    )));
    assert!(world.events.names().contains(&"recurring_payment_cancelled"));

    // No third attempt, ever
    world.clock.set(at(8, 1));
    assert!(billing(&world).process_due().await.unwrap().lines.is_empty());
    assert!(billing(&world).retry_failed().await.unwrap().lines.is_empty());
    assert_eq!(world.gateway.recurrence_calls().len(), 2);
}

#[tokio::test]
async fn test_successful_retry_clears_the_strike() {
    let (world, contract) = rented_world().await;
    world.gateway.script_recurrence(Err(GoPayError::Api {
        status: 409,
        body: "insufficient funds".to_string(),
    }));

    world.clock.set(at(7, 1));
    assert_eq!(billing(&world).process_due().await.unwrap().failed, 1);

    world.clock.set(at(7, 4));
    let retry = billing(&world).retry_failed().await.unwrap();
    assert_eq!(retry.succeeded, 1);

    let billing_state = world.contract(contract.id).await.recurring.unwrap();
    assert_eq!(billing_state.failed_attempts, 0);
    assert_eq!(billing_state.last_failure_at, None);
    assert_eq!(billing_state.next_billing_date, date(8, 1));
    assert!(world.gateway.voided().is_empty());
}

#[tokio::test]
async fn test_transient_failure_counts_by_default() {
    let (world, contract) = rented_world().await;
    world.gateway.script_recurrence(Err(GoPayError::Timeout));

    world.clock.set(at(7, 1));
    let report = billing(&world).process_due().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(
        world.contract(contract.id).await.recurring.unwrap().failed_attempts,
        1
    );
}

#[tokio::test]
async fn test_transient_failure_can_be_skipped() {
    let (world, contract) = rented_world().await;
    world.gateway.script_recurrence(Err(GoPayError::Timeout));

    let mut ctx = world.ctx.clone();
    ctx.settings.transient_failures = TransientFailurePolicy::Skip;

    world.clock.set(at(7, 1));
    let report = RecurringBillingService::new(ctx.clone())
        .process_due()
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert!(!report.has_failures());
    assert_eq!(
        world.contract(contract.id).await.recurring.unwrap().failed_attempts,
        0
    );

    // Still due, charged on the next run
    let next = RecurringBillingService::new(ctx).process_due().await.unwrap();
    assert_eq!(next.succeeded, 1);
}

#[tokio::test]
async fn test_limited_contracts_are_never_charged() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    world
        .rent(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(9, 1)))
        .await;

    world.clock.set(at(7, 1));
    let report = billing(&world).process_due().await.unwrap();

    assert!(report.lines.is_empty());
    assert!(world.gateway.recurrence_calls().is_empty());
}
