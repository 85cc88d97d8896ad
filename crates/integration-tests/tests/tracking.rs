//! Integration tests for tracking submission: deduplication, retries and
//! cancellation. All run under paused time.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pricepulse_client::ClientError;
use pricepulse_client::tracking::TrackingError;
use pricepulse_integration_tests::{Harness, StubBackend, TrackOutcome, persisted_session, product};

const URL: &str = "https://shop.example/item/42";

// =============================================================================
// Validation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_submit_requires_session() {
    let harness = Harness::new();

    let err = harness.client.tracking().submit(URL).await.unwrap_err();

    assert!(matches!(err, TrackingError::NoSession));
    assert!(harness.backend.track_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_submit_rejects_non_http_url() {
    let harness = Harness::new();
    harness.sign_in().await;

    let err = harness.client.tracking().submit("ftp://shop.example/x").await.unwrap_err();

    assert!(matches!(err, TrackingError::InvalidUrl(_)));
    assert!(harness.backend.track_calls().is_empty());
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_tracked_url_is_not_submitted_again() {
    let harness = Harness::new();
    harness.sign_in().await;

    let tracked = harness.client.track(URL).await.unwrap();
    assert_eq!(tracked.source_url, URL);

    let err = harness.client.tracking().submit(&format!("  {URL} ")).await.unwrap_err();

    assert!(matches!(err, TrackingError::DuplicateTracking(ref u) if u == URL));
    assert_eq!(harness.backend.track_calls().len(), 1);
    assert_eq!(harness.client.collection().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_submissions_of_same_url() {
    let harness = Harness::new();
    harness.sign_in().await;
    harness.backend.set_track_delay(Duration::from_secs(3));

    let tracking = harness.client.tracking();
    let (first, second) = tokio::join!(tracking.submit(URL), tracking.submit(URL));

    assert!(first.is_ok());
    assert!(matches!(second, Err(TrackingError::DuplicateTracking(_))));
    assert_eq!(harness.backend.track_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_url_from_server_list_counts_as_tracked() {
    let harness = Harness::new();
    harness.backend.seed_products([product("p9", URL, 50)]);
    harness.sign_in().await;
    harness.client.products().refresh_list().await.unwrap();

    let err = harness.client.tracking().submit(URL).await.unwrap_err();

    assert!(matches!(err, TrackingError::DuplicateTracking(_)));
    assert!(harness.backend.track_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restored_session_rejects_server_held_url() {
    let backend = StubBackend::new();
    backend.seed_products([product("p9", URL, 50)]);
    let harness = Harness::with(backend, persisted_session("tok-restored", "user@example.com"));
    harness.client.session().restore().await.unwrap();
    assert!(harness.client.collection().is_empty());

    let err = harness.client.track(URL).await.unwrap_err();

    assert!(matches!(err, ClientError::Tracking(TrackingError::DuplicateTracking(_))));
    assert!(harness.backend.track_calls().is_empty());
    assert_eq!(harness.backend.list_count(), 1);
    assert!(harness.client.collection().contains_url(URL));
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_again_reloads_before_dedup() {
    let harness = Harness::new();
    harness.backend.seed_products([product("p9", URL, 50)]);
    harness.sign_in().await;
    harness.client.products().refresh_list().await.unwrap();
    harness.sign_in().await;

    let err = harness.client.tracking().submit(URL).await.unwrap_err();

    assert!(matches!(err, TrackingError::DuplicateTracking(_)));
    assert!(harness.backend.track_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_list_blocks_submission() {
    let harness = Harness::new();
    harness.sign_in().await;
    harness.backend.fail_list(Some(503));

    let err = harness.client.tracking().submit(URL).await.unwrap_err();
    assert!(matches!(err, TrackingError::ListUnavailable(_)));
    assert!(harness.backend.track_calls().is_empty());

    harness.backend.fail_list(None);
    harness.client.tracking().submit(URL).await.unwrap();
    assert_eq!(harness.backend.track_calls().len(), 1);
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_retries_until_product_id_returned() {
    let harness = Harness::new();
    harness.sign_in().await;
    harness.backend.script_tracking([
        TrackOutcome::MissingId,
        TrackOutcome::Fail(502, "Bad gateway"),
        TrackOutcome::Accept,
    ]);

    let tracked = harness.client.tracking().submit(URL).await.unwrap();

    assert_eq!(harness.backend.track_calls().len(), 3);
    assert_eq!(harness.client.collection().get(&tracked.id), Some(tracked));
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_twenty_spaced_attempts() {
    let harness = Harness::new();
    harness.sign_in().await;
    harness
        .backend
        .script_tracking(std::iter::repeat_n(TrackOutcome::Fail(500, "Scraper unavailable"), 25));

    let err = harness.client.tracking().submit(URL).await.unwrap_err();

    match err {
        TrackingError::TrackingFailed { attempts, last_reason } => {
            assert_eq!(attempts, 20);
            assert_eq!(last_reason.as_deref(), Some("Scraper unavailable"));
        }
        other => panic!("expected TrackingFailed, got {other:?}"),
    }

    let calls = harness.backend.track_calls();
    assert_eq!(calls.len(), 20);
    for (earlier, later) in calls.iter().zip(calls.iter().skip(1)) {
        assert!(*later - *earlier >= Duration::from_secs(1));
    }
    assert!(harness.client.collection().is_empty());

    // The URL is released once the attempt ends.
    harness.client.tracking().submit(URL).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_stops_retrying() {
    let harness = Harness::new();
    harness.sign_in().await;
    harness.backend.script_tracking([TrackOutcome::Unauthorized]);

    let err = harness.client.track(URL).await.unwrap_err();

    assert!(matches!(err, ClientError::Tracking(TrackingError::Unauthorized(_))));
    assert!(err.requires_login());
    assert_eq!(harness.backend.track_calls().len(), 1);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_retry_loop() {
    let harness = Harness::new();
    harness.sign_in().await;
    harness
        .backend
        .script_tracking(std::iter::repeat_n(TrackOutcome::Fail(503, "Busy"), 20));

    let cancel = CancellationToken::new();
    let client = harness.client.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move { client.tracking().submit_with_cancel(URL, &token).await });

    tokio::time::sleep(Duration::from_millis(2500)).await;
    cancel.cancel();
    let result = task.await.unwrap();

    assert!(matches!(result, Err(TrackingError::Cancelled)));
    assert_eq!(harness.backend.track_calls().len(), 3);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.backend.track_calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_logout_discards_in_flight_result() {
    let harness = Harness::new();
    harness.sign_in().await;
    harness.backend.set_track_delay(Duration::from_secs(5));

    let client = harness.client.clone();
    let task = tokio::spawn(async move { client.track(URL).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.client.session().logout().await.unwrap();
    let result = task.await.unwrap();

    assert!(matches!(result, Err(ClientError::Tracking(TrackingError::Cancelled))));
    assert!(harness.client.collection().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_result_for_previous_user_not_shown_to_next() {
    let harness = Harness::new();
    harness.sign_in().await;
    harness.backend.set_track_delay(Duration::from_secs(5));

    let client = harness.client.clone();
    let task = tokio::spawn(async move { client.tracking().submit(URL).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    harness.client.session().logout().await.unwrap();
    harness.sign_in().await;
    let result = task.await.unwrap();

    assert!(matches!(result, Err(TrackingError::Cancelled)));
    assert!(harness.client.collection().is_empty());
}
