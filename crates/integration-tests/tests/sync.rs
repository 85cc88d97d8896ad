//! Integration tests for refresh timers and price alerts.

use std::sync::atomic::Ordering;
use std::time::Duration;

use rust_decimal::Decimal;

use pricepulse_client::alerts::AlertError;
use pricepulse_client::SyncConfig;
use pricepulse_client::polling::PollingError;
use pricepulse_core::{AlertId, ProductId};
use pricepulse_integration_tests::{Harness, product};

const LIST_PERIOD: Duration = Duration::from_secs(5 * 60);
const DETAIL_PERIOD: Duration = Duration::from_secs(30 * 60);

fn seeded() -> Harness {
    let harness = Harness::new();
    harness.backend.seed_products([
        product("p1", "https://shop.example/a", 20),
        product("p2", "https://shop.example/b", 35),
    ]);
    harness
}

// =============================================================================
// Refresh timers
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_list_refresh_runs_each_period() {
    let harness = seeded();
    harness.sign_in().await;

    let handle = harness.client.polling().start_list_refresh().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.backend.list_count(), 0);

    tokio::time::sleep(LIST_PERIOD).await;
    assert_eq!(harness.backend.list_count(), 1);
    assert_eq!(harness.client.collection().len(), 2);

    tokio::time::sleep(LIST_PERIOD).await;
    assert_eq!(harness.backend.list_count(), 2);

    harness.client.polling().stop_list_refresh();
    assert!(handle.is_stopped());
    tokio::time::sleep(LIST_PERIOD * 3).await;
    assert_eq!(harness.backend.list_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timers_require_session() {
    let harness = seeded();

    assert!(matches!(
        harness.client.polling().start_list_refresh(),
        Err(PollingError::NoSession)
    ));
    assert!(matches!(
        harness.client.polling().start_detail_refresh(ProductId::new("p1")),
        Err(PollingError::NoSession)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_zero_period_is_refused() {
    let harness = Harness::with_sync(SyncConfig {
        list_refresh: Duration::ZERO,
        detail_refresh: Duration::ZERO,
        ..SyncConfig::default()
    });
    harness.sign_in().await;
    let polling = harness.client.polling();

    assert!(matches!(polling.start_list_refresh(), Err(PollingError::ZeroPeriod("list"))));
    assert!(matches!(
        polling.start_detail_refresh(ProductId::new("p1")),
        Err(PollingError::ZeroPeriod("detail"))
    ));
    assert!(polling.detail_product().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_handle_reports_stopped_after_stale_refresh() {
    let harness = seeded();
    harness.sign_in().await;
    harness.backend.set_list_delay(Duration::from_secs(10));
    let handle = harness.client.polling().start_list_refresh().unwrap();

    // Sign in again while the first scheduled request is in flight.
    tokio::time::sleep(LIST_PERIOD + Duration::from_secs(1)).await;
    assert_eq!(harness.backend.list_count(), 1);
    harness.sign_in().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(handle.is_stopped());
    assert!(harness.client.collection().is_empty());
    tokio::time::sleep(LIST_PERIOD * 2).await;
    assert_eq!(harness.backend.list_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_logout_stops_every_timer() {
    let harness = seeded();
    harness.sign_in().await;
    let polling = harness.client.polling();
    let list = polling.start_list_refresh().unwrap();
    let detail = polling.start_detail_refresh(ProductId::new("p1")).unwrap();

    harness.client.session().logout().await.unwrap();

    assert!(list.is_stopped());
    assert!(detail.is_stopped());
    assert!(polling.detail_product().is_none());
    tokio::time::sleep(DETAIL_PERIOD * 2).await;
    assert_eq!(harness.backend.list_count(), 0);
    assert_eq!(harness.backend.get_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_detail_refresh_replaces_previous_product() {
    let harness = seeded();
    harness.sign_in().await;
    let polling = harness.client.polling();

    let first = polling.start_detail_refresh(ProductId::new("p1")).unwrap();
    let second = polling.start_detail_refresh(ProductId::new("p2")).unwrap();

    assert!(first.is_stopped());
    assert!(!second.is_stopped());
    assert_eq!(polling.detail_product(), Some(ProductId::new("p2")));

    tokio::time::sleep(DETAIL_PERIOD + Duration::from_secs(1)).await;
    assert_eq!(harness.backend.get_count(), 1);
    assert!(harness.client.collection().get(&ProductId::new("p2")).is_some());

    polling.stop_detail_refresh();
    assert!(second.is_stopped());
}

// =============================================================================
// Products
// =============================================================================

#[tokio::test]
async fn test_pause_and_remove_product() {
    let harness = seeded();
    harness.sign_in().await;
    let products = harness.client.products();
    products.refresh_list().await.unwrap();

    products.set_tracking(&ProductId::new("p1"), false).await.unwrap();
    let paused = harness.client.collection().get(&ProductId::new("p1")).unwrap();
    assert!(!paused.tracking_enabled);

    products.remove(&ProductId::new("p2")).await.unwrap();
    assert!(harness.client.collection().get(&ProductId::new("p2")).is_none());
    assert_eq!(products.refresh_list().await.unwrap().len(), 1);
}

// =============================================================================
// Alerts
// =============================================================================

#[tokio::test]
async fn test_alert_with_invalid_price_makes_no_request() {
    let harness = seeded();
    harness.sign_in().await;
    let alerts = harness.client.alerts();

    let zero = alerts.submit(&ProductId::new("p1"), Decimal::ZERO, "user@example.com").await;
    let negative = alerts
        .submit(&ProductId::new("p1"), Decimal::new(-5, 0), "user@example.com")
        .await;

    assert!(matches!(zero, Err(AlertError::InvalidPrice(_))));
    assert!(matches!(negative, Err(AlertError::InvalidPrice(_))));
    assert_eq!(harness.backend.alert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_alert_with_invalid_email_makes_no_request() {
    let harness = seeded();
    harness.sign_in().await;

    let result = harness
        .client
        .alerts()
        .submit(&ProductId::new("p1"), Decimal::new(1999, 2), "user at example")
        .await;

    assert!(matches!(result, Err(AlertError::InvalidEmail(_))));
    assert_eq!(harness.backend.alert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_alert_requires_session() {
    let harness = seeded();

    let result = harness
        .client
        .alerts()
        .submit(&ProductId::new("p1"), Decimal::new(1999, 2), "user@example.com")
        .await;

    assert!(matches!(result, Err(AlertError::NoSession)));
    assert_eq!(harness.backend.alert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_alert_submit_list_delete() {
    let harness = seeded();
    harness.sign_in().await;
    let alerts = harness.client.alerts();

    let message = alerts
        .submit(&ProductId::new("p1"), Decimal::new(1999, 2), "deals@example.com")
        .await
        .unwrap();
    assert_eq!(message, "Price alert created successfully");

    let received = harness.backend.alerts_received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].target_price.to_string(), "19.99");
    assert_eq!(received[0].notify_email.as_str(), "deals@example.com");

    let listed = alerts.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].product_id, ProductId::new("p1"));

    alerts.delete(&AlertId::new("a1")).await.unwrap();
    assert!(alerts.list().await.unwrap().is_empty());
}
