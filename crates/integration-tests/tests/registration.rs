//! Integration tests for email registration with a one-time code.

use std::sync::atomic::Ordering;

use chrono::{Duration, TimeZone, Utc};

use pricepulse_client::session::{AuthError, OtpError, OtpState, RegistrationProfile, SessionStorage, TOKEN_KEY};
use pricepulse_integration_tests::{Harness, StubBackend, VALID_CODE};

fn profile() -> RegistrationProfile {
    RegistrationProfile::new("new@example.com", "hunter22", "hunter22", Some("  New User ".to_string())).unwrap()
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

// =============================================================================
// Profile validation
// =============================================================================

#[test]
fn test_profile_rejects_short_password() {
    let err = RegistrationProfile::new("new@example.com", "abc", "abc", None).unwrap_err();
    assert!(matches!(err, AuthError::WeakPassword(_)));
}

#[test]
fn test_profile_rejects_mismatched_confirmation() {
    let err = RegistrationProfile::new("new@example.com", "hunter22", "hunter23", None).unwrap_err();
    assert!(matches!(err, AuthError::PasswordMismatch));
}

// =============================================================================
// Flow
// =============================================================================

#[tokio::test]
async fn test_register_with_acknowledged_code() {
    let harness = Harness::new();
    let mut flow = harness.client.start_registration(profile());

    let message = flow.send_code(t0()).await.unwrap();
    assert_eq!(message, "Verification code sent to new@example.com");
    assert_eq!(flow.state(t0()), OtpState::CodeSent);

    flow.input_mut().set(VALID_CODE);
    flow.verify(t0() + Duration::seconds(30)).await.unwrap();
    assert_eq!(flow.state(t0()), OtpState::Verified);

    let session = flow.complete_registration(harness.client.session()).await.unwrap();

    assert_eq!(session.identity.name.as_deref(), Some("New User"));
    assert_eq!(harness.backend.register_calls.load(Ordering::SeqCst), 1);
    assert_eq!(flow.state(t0()), OtpState::Registered);
    assert!(harness.client.session().is_active());
    assert!(harness.storage.get(TOKEN_KEY).await.unwrap().is_some());
}

#[tokio::test]
async fn test_register_uses_grant_from_verification() {
    let harness = Harness::with(
        StubBackend::granting_on_verify(),
        std::sync::Arc::new(pricepulse_client::session::MemoryStorage::new()),
    );
    let mut flow = harness.client.start_registration(profile());

    flow.send_code(t0()).await.unwrap();
    flow.input_mut().set(VALID_CODE);
    flow.verify(t0()).await.unwrap();
    flow.complete_registration(harness.client.session()).await.unwrap();

    assert_eq!(harness.backend.register_calls.load(Ordering::SeqCst), 0);
    assert!(harness.client.session().is_active());
}

#[tokio::test]
async fn test_wrong_code_can_be_retried() {
    let harness = Harness::new();
    let mut flow = harness.client.start_registration(profile());
    flow.send_code(t0()).await.unwrap();

    flow.input_mut().set("111111");
    let err = flow.verify(t0()).await.unwrap_err();
    assert!(matches!(err, OtpError::Rejected(ref r) if r == "Invalid verification code"));
    assert_eq!(flow.state(t0()), OtpState::CodeSent);

    flow.input_mut().set(VALID_CODE);
    flow.verify(t0()).await.unwrap();
    assert_eq!(flow.state(t0()), OtpState::Verified);
}

#[tokio::test]
async fn test_incomplete_code_makes_no_request() {
    let harness = Harness::new();
    let mut flow = harness.client.start_registration(profile());
    flow.send_code(t0()).await.unwrap();

    flow.input_mut().set("12a3");
    assert_eq!(flow.input().as_str(), "123");
    assert!(matches!(flow.verify(t0()).await, Err(OtpError::IncompleteCode)));
    assert_eq!(harness.backend.verify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_complete_before_verify_is_refused() {
    let harness = Harness::new();
    let mut flow = harness.client.start_registration(profile());
    flow.send_code(t0()).await.unwrap();

    let err = flow.complete_registration(harness.client.session()).await.unwrap_err();

    assert!(matches!(err, OtpError::NotVerified));
    assert!(!harness.client.session().is_active());
}

// =============================================================================
// Expiry and resend
// =============================================================================

#[tokio::test]
async fn test_expired_code_is_refused_without_request() {
    let harness = Harness::new();
    let mut flow = harness.client.start_registration(profile());
    flow.send_code(t0()).await.unwrap();
    flow.input_mut().set(VALID_CODE);

    let later = t0() + Duration::minutes(10) + Duration::seconds(1);
    assert_eq!(flow.state(later), OtpState::Expired);
    assert!(matches!(flow.verify(later).await, Err(OtpError::Expired)));
    assert_eq!(harness.backend.verify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resend_only_after_expiry() {
    let harness = Harness::new();
    let mut flow = harness.client.start_registration(profile());
    flow.send_code(t0()).await.unwrap();

    let early = t0() + Duration::minutes(5);
    assert!(!flow.can_resend(early));
    let err = flow.resend(early).await.unwrap_err();
    assert!(matches!(err, OtpError::ResendTooEarly { ref remaining } if remaining == "5:00"));

    let expired = t0() + Duration::minutes(11);
    flow.input_mut().set("999");
    assert!(flow.can_resend(expired));
    flow.resend(expired).await.unwrap();

    assert_eq!(harness.backend.send_code_calls.load(Ordering::SeqCst), 2);
    assert_eq!(flow.state(expired), OtpState::CodeSent);
    assert!(flow.input().as_str().is_empty());

    flow.input_mut().set(VALID_CODE);
    flow.verify(expired + Duration::minutes(1)).await.unwrap();
}

#[tokio::test]
async fn test_send_code_twice_is_refused() {
    let harness = Harness::new();
    let mut flow = harness.client.start_registration(profile());
    flow.send_code(t0()).await.unwrap();

    assert!(matches!(flow.send_code(t0()).await, Err(OtpError::AlreadySent)));
    assert_eq!(harness.backend.send_code_calls.load(Ordering::SeqCst), 1);
}
