//! Domain events refused by the dispatcher are kept and retried.

#![allow(clippy::unwrap_used)]

use boxrent_integration_tests::{CUSTOMER, SMALL_BOX, World, at, date};

#[tokio::test]
async fn test_refused_events_are_retried_from_outbox() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    world.events.refuse(true);

    // The order itself does not depend on delivery
    let order = world
        .reserve(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await
        .unwrap();
    assert!(world.events.names().is_empty());

    let still_down = world.ctx.events.dispatch_outbox(100).await.unwrap();
    assert_eq!(still_down.failed, 1);
    assert!(still_down.lines[0].starts_with("[ERROR]"));

    world.events.refuse(false);
    let sent = world.ctx.events.dispatch_outbox(100).await.unwrap();
    assert_eq!(sent.succeeded, 1);
    assert!(sent.lines[0].starts_with("[SENT]"));
    assert!(sent.lines[0].ends_with("order_reserved (attempt 3)"));
    assert_eq!(world.events.names(), vec!["order_reserved"]);
    assert!(world.events.events().iter().any(|event| matches!(
        event,
        boxrent_core::DomainEvent::OrderReserved { order_id, .. } if *order_id == order.id
    )));

    let drained = world.ctx.events.dispatch_outbox(100).await.unwrap();
    assert!(drained.lines.is_empty());
}

#[tokio::test]
async fn test_outbox_respects_limit() {
    let world = World::at(at(5, 20));
    world.add_unit(1, "A1");
    world.add_unit(2, "A2");
    world.events.refuse(true);

    world
        .reserve(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await
        .unwrap();
    world
        .reserve(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await
        .unwrap();

    world.events.refuse(false);
    let first = world.ctx.events.dispatch_outbox(1).await.unwrap();
    assert_eq!(first.succeeded, 1);
    let rest = world.ctx.events.dispatch_outbox(10).await.unwrap();
    assert_eq!(rest.succeeded, 1);
    assert_eq!(world.events.names().len(), 2);
}
