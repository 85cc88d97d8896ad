//! Email one-time code registration flow.
//!
//! ```text
//! Idle --send_code--> CodeSent --verify--> Verified --complete_registration--> Registered
//!                        |
//!                        +--(now > expires_at)--> Expired --resend--> CodeSent
//! ```
//!
//! The clock is always supplied by the caller, so the flow can be driven
//! deterministically in tests and by a UI countdown.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use pricepulse_core::Email;

use super::{AuthError, RegistrationProfile, Session, SessionStore};
use crate::gateway::{AuthBackend, AuthGrant, GatewayError};

/// Lifetime of a one-time code.
pub const CODE_TTL_SECS: i64 = 600;

/// Number of digits in a one-time code.
pub const CODE_LENGTH: usize = 6;

/// Verification attempts allowed per issued code.
pub const DEFAULT_ATTEMPTS_ALLOWED: u32 = 5;

/// Errors from the one-time code flow.
#[derive(Debug, Error)]
pub enum OtpError {
    /// Verification or resend was attempted before a code was sent.
    #[error("no verification code has been sent")]
    NoChallenge,

    /// A code is already outstanding; use resend once it expires.
    #[error("a verification code has already been sent")]
    AlreadySent,

    /// The entered code does not have exactly six digits.
    #[error("please enter the complete {CODE_LENGTH}-digit code")]
    IncompleteCode,

    /// The code expired before it was verified.
    #[error("verification code has expired")]
    Expired,

    /// Every attempt for this code was used.
    #[error("too many attempts, request a new code once this one expires")]
    TooManyAttempts,

    /// Resend is only allowed once the countdown reaches zero.
    #[error("a new code can be requested in {remaining}")]
    ResendTooEarly {
        /// Countdown text (`m:ss`).
        remaining: String,
    },

    /// The backend rejected the code. Carries the server's reason.
    #[error("{0}")]
    Rejected(String),

    /// Registration was attempted before the code was verified.
    #[error("email has not been verified")]
    NotVerified,

    /// The flow already finished.
    #[error("registration already completed")]
    Completed,

    /// Backend or session failure.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<GatewayError> for OtpError {
    fn from(err: GatewayError) -> Self {
        match AuthError::from(err) {
            AuthError::Rejected(reason) | AuthError::InvalidCredentials(reason) => {
                Self::Rejected(reason)
            }
            other => Self::Auth(other),
        }
    }
}

/// Observable state of the flow at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpState {
    /// No code requested yet.
    Idle,
    /// A code is outstanding and still valid.
    CodeSent,
    /// The outstanding code has expired.
    Expired,
    /// The code was accepted.
    Verified,
    /// The account exists and a session was established.
    Registered,
}

/// An issued one-time code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpChallenge {
    /// Address the code was sent to.
    pub email: Email,
    /// When the code was issued.
    pub issued_at: DateTime<Utc>,
    /// Last instant at which the code is accepted.
    pub expires_at: DateTime<Utc>,
    /// Verification attempts left.
    pub attempts_remaining: u32,
}

impl OtpChallenge {
    /// Issue a challenge at `now`.
    #[must_use]
    pub fn issue(email: Email, now: DateTime<Utc>, attempts_allowed: u32) -> Self {
        Self {
            email,
            issued_at: now,
            expires_at: now + Duration::seconds(CODE_TTL_SECS),
            attempts_remaining: attempts_allowed,
        }
    }

    /// Whether the code is no longer accepted at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left before expiry, never negative.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Countdown text in `m:ss` form.
    #[must_use]
    pub fn countdown(&self, now: DateTime<Utc>) -> String {
        let secs = self.remaining(now).num_seconds();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

/// Digits typed so far, capped at [`CODE_LENGTH`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeInput(String);

impl CodeInput {
    /// Append a digit. Non-digits and input past six digits are ignored.
    pub fn push(&mut self, c: char) -> bool {
        if c.is_ascii_digit() && self.0.len() < CODE_LENGTH {
            self.0.push(c);
            true
        } else {
            false
        }
    }

    /// Remove the last digit.
    pub fn backspace(&mut self) {
        self.0.pop();
    }

    /// Replace the buffer with the digits of `text` (pasting a code).
    pub fn set(&mut self, text: &str) {
        self.0.clear();
        for c in text.chars() {
            self.push(c);
        }
    }

    /// Empty the buffer.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Whether all six digits are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.0.len() == CODE_LENGTH
    }

    /// Digits entered so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Drives one signup through code verification to an established session.
pub struct OtpRegistration {
    backend: Arc<dyn AuthBackend>,
    profile: RegistrationProfile,
    attempts_allowed: u32,
    challenge: Option<OtpChallenge>,
    input: CodeInput,
    grant: Option<AuthGrant>,
    verified: bool,
    registered: bool,
}

impl OtpRegistration {
    /// Start a flow for `profile`.
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>, profile: RegistrationProfile) -> Self {
        Self {
            backend,
            profile,
            attempts_allowed: DEFAULT_ATTEMPTS_ALLOWED,
            challenge: None,
            input: CodeInput::default(),
            grant: None,
            verified: false,
            registered: false,
        }
    }

    /// Override the per-code attempt limit.
    #[must_use]
    pub fn with_attempts_allowed(mut self, attempts: u32) -> Self {
        self.attempts_allowed = attempts.max(1);
        self
    }

    /// State of the flow at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> OtpState {
        if self.registered {
            OtpState::Registered
        } else if self.verified {
            OtpState::Verified
        } else {
            match &self.challenge {
                None => OtpState::Idle,
                Some(c) if c.is_expired(now) => OtpState::Expired,
                Some(_) => OtpState::CodeSent,
            }
        }
    }

    /// The outstanding challenge, if any.
    #[must_use]
    pub const fn challenge(&self) -> Option<&OtpChallenge> {
        self.challenge.as_ref()
    }

    /// The code input buffer.
    #[must_use]
    pub const fn input(&self) -> &CodeInput {
        &self.input
    }

    /// Mutable access to the code input buffer.
    pub const fn input_mut(&mut self) -> &mut CodeInput {
        &mut self.input
    }

    /// Whether resend is allowed at `now` (only once the countdown hits zero).
    #[must_use]
    pub fn can_resend(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == OtpState::Expired
    }

    /// Request the first code.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::AlreadySent` if a code was already requested, or the
    /// backend's reason if it refuses (for example, email already registered).
    #[instrument(skip(self), fields(email = %self.profile.email))]
    pub async fn send_code(&mut self, now: DateTime<Utc>) -> Result<String, OtpError> {
        match self.state(now) {
            OtpState::Idle => self.issue(now).await,
            OtpState::CodeSent | OtpState::Expired => Err(OtpError::AlreadySent),
            OtpState::Verified | OtpState::Registered => Err(OtpError::Completed),
        }
    }

    /// Request a fresh code after the previous one expired.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::ResendTooEarly` while the countdown is running.
    #[instrument(skip(self), fields(email = %self.profile.email))]
    pub async fn resend(&mut self, now: DateTime<Utc>) -> Result<String, OtpError> {
        match (self.state(now), &self.challenge) {
            (OtpState::Expired, _) => self.issue(now).await,
            (OtpState::CodeSent, Some(challenge)) => Err(OtpError::ResendTooEarly {
                remaining: challenge.countdown(now),
            }),
            (OtpState::Idle, _) | (OtpState::CodeSent, None) => Err(OtpError::NoChallenge),
            (OtpState::Verified | OtpState::Registered, _) => Err(OtpError::Completed),
        }
    }

    async fn issue(&mut self, now: DateTime<Utc>) -> Result<String, OtpError> {
        let message = self.backend.send_code(&self.profile.email).await?;
        self.challenge = Some(OtpChallenge::issue(
            self.profile.email.clone(),
            now,
            self.attempts_allowed,
        ));
        self.input.clear();
        info!("verification code sent");
        Ok(message)
    }

    /// Verify the code in the input buffer.
    ///
    /// A rejected code leaves the flow in `CodeSent` so the user can retry.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::Expired` after expiry regardless of the code,
    /// `OtpError::IncompleteCode` unless six digits were entered, or
    /// `OtpError::Rejected` with the backend's reason.
    #[instrument(skip(self), fields(email = %self.profile.email))]
    pub async fn verify(&mut self, now: DateTime<Utc>) -> Result<(), OtpError> {
        match self.state(now) {
            OtpState::Idle => return Err(OtpError::NoChallenge),
            OtpState::Expired => return Err(OtpError::Expired),
            OtpState::Verified | OtpState::Registered => return Err(OtpError::Completed),
            OtpState::CodeSent => {}
        }
        if !self.input.is_complete() {
            return Err(OtpError::IncompleteCode);
        }

        let challenge = self.challenge.as_mut().ok_or(OtpError::NoChallenge)?;
        if challenge.attempts_remaining == 0 {
            return Err(OtpError::TooManyAttempts);
        }
        challenge.attempts_remaining -= 1;

        let result = self
            .backend
            .verify_code(
                &self.profile.email,
                self.input.as_str(),
                Some(&self.profile.password),
                self.profile.name.as_deref(),
            )
            .await;

        match result {
            Ok(grant) => {
                self.grant = grant;
                self.verified = true;
                info!("verification code accepted");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "verification code rejected");
                Err(e.into())
            }
        }
    }

    /// Create the account and establish its session in `store`.
    ///
    /// Uses the token issued during verification when the backend provided
    /// one, otherwise registers through the store's provider.
    ///
    /// # Errors
    ///
    /// Returns `OtpError::NotVerified` before a successful [`verify`](Self::verify).
    #[instrument(skip(self, store), fields(email = %self.profile.email))]
    pub async fn complete_registration(&mut self, store: &SessionStore) -> Result<Session, OtpError> {
        if self.registered {
            return Err(OtpError::Completed);
        }
        if !self.verified {
            return Err(OtpError::NotVerified);
        }

        let session = match self.grant.take() {
            Some(grant) => {
                store
                    .establish(Session::from_grant(grant, store.source()))
                    .await?
            }
            None => store.register(&self.profile).await?,
        };
        self.registered = true;
        self.challenge = None;
        Ok(session)
    }

    /// Give up on the flow, discarding any outstanding code.
    pub fn abandon(&mut self) {
        self.challenge = None;
        self.input.clear();
        self.grant = None;
        self.verified = false;
    }
}
