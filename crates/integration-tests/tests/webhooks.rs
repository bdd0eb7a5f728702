//! HTTP surface: GoPay callbacks and health checks.

#![allow(clippy::unwrap_used)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use boxrent_core::OrderStatus;
use boxrent_core::domain::Order;
use boxrent_integration_tests::{CUSTOMER, SMALL_BOX, World, at, date};
use boxrent_service::gopay::GoPayPaymentStatus;
use boxrent_service::routes::routes;
use boxrent_service::state::AppState;
use tower::ServiceExt;

fn app(world: &World) -> Router {
    routes().with_state(AppState::new(world.ctx.clone(), None))
}

async fn send(world: &World, method: Method, uri: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app(world).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn paying_order(world: &World) -> Order {
    world.add_unit(1, "A1");
    let order = world
        .reserve(CUSTOMER, SMALL_BOX, date(6, 1), Some(date(7, 1)))
        .await
        .unwrap();
    world.start_payment(&order, CUSTOMER).await;
    world.order(order.id).await
}

#[tokio::test]
async fn test_notification_completes_paid_order() {
    let world = World::at(at(5, 20));
    let order = paying_order(&world).await;
    let payment_id = order.gateway_payment_id.unwrap();
    world.gateway.set_status(payment_id, GoPayPaymentStatus::Paid);

    let (status, _) = send(
        &world,
        Method::GET,
        &format!("/webhooks/gopay?id={payment_id}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(world.order(order.id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_notification_accepts_post() {
    let world = World::at(at(5, 20));
    let order = paying_order(&world).await;
    let payment_id = order.gateway_payment_id.unwrap();
    world.gateway.set_status(payment_id, GoPayPaymentStatus::Paid);

    let (status, _) = send(
        &world,
        Method::POST,
        &format!("/webhooks/gopay?id={payment_id}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(world.order(order.id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_notification_answers_ok_even_when_processing_fails() {
    let world = World::at(at(5, 20));
    let order = paying_order(&world).await;
    let payment_id = order.gateway_payment_id.unwrap();
    world.gateway.set_status(payment_id, GoPayPaymentStatus::Paid);
    world.gateway.fail_status(true);

    let (status, _) = send(
        &world,
        Method::GET,
        &format!("/webhooks/gopay?id={payment_id}"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(world.order(order.id).await.status, order.status);

    // GoPay retries; the next notification gets through
    world.gateway.fail_status(false);
    send(
        &world,
        Method::GET,
        &format!("/webhooks/gopay?id={payment_id}"),
    )
    .await;
    assert_eq!(world.order(order.id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn test_notification_without_id_is_acknowledged() {
    let world = World::at(at(5, 20));

    let (missing, _) = send(&world, Method::GET, "/webhooks/gopay").await;
    let (garbage, _) = send(&world, Method::GET, "/webhooks/gopay?id=abc").await;

    assert_eq!(missing, StatusCode::OK);
    assert_eq!(garbage, StatusCode::OK);
}

#[tokio::test]
async fn test_payment_return_reports_order_status() {
    let world = World::at(at(5, 20));
    let order = paying_order(&world).await;
    let payment_id = order.gateway_payment_id.unwrap();
    world.gateway.set_status(payment_id, GoPayPaymentStatus::Paid);

    let (status, body) = send(
        &world,
        Method::GET,
        &format!("/orders/{}/payment-return?id={payment_id}", order.id),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""status":"completed""#), "body: {body}");
}

#[tokio::test]
async fn test_payment_return_rejects_foreign_payment() {
    let world = World::at(at(5, 20));
    let order = paying_order(&world).await;

    let (status, _) = send(
        &world,
        Method::GET,
        &format!("/orders/{}/payment-return?id=42", order.id),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (missing, _) = send(&world, Method::GET, "/orders/999/payment-return?id=42").await;
    assert_eq!(missing, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoints() {
    let world = World::at(at(5, 20));

    let (live, body) = send(&world, Method::GET, "/health").await;
    assert_eq!(live, StatusCode::OK);
    assert_eq!(body, "ok");

    let (ready, _) = send(&world, Method::GET, "/health/ready").await;
    assert_eq!(ready, StatusCode::OK);
}
