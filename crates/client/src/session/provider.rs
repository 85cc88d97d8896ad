//! Pluggable authentication providers.
//!
//! The session store talks to exactly one [`AuthProvider`]. Each provider
//! turns [`Credentials`] into a [`Session`] in its own way:
//!
//! - [`TokenProvider`] - email/password against the REST backend
//! - [`FederatedProvider`] - authorization code from an identity provider,
//!   exchanged through the backend callback
//! - [`AnonymousProvider`] - local-only identity with no credential

use core::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::instrument;
use url::Url;

use pricepulse_core::{Email, Identity, SessionSource, UserId};

use super::{AuthError, Session};
use crate::config::FederatedConfig;
use crate::gateway::{AuthBackend, AuthGrant};

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Scopes requested from the federated identity provider.
const FEDERATED_SCOPES: &str = "openid email profile";

/// Which provider the session store is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthMode {
    /// Email/password against the REST backend.
    #[default]
    Token,
    /// Federated identity provider.
    Federated,
    /// Local-only, no backend credential.
    Anonymous,
}

/// Error returned when parsing an [`AuthMode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown auth mode '{0}' (expected token, federated or anonymous)")]
pub struct ParseAuthModeError(String);

impl FromStr for AuthMode {
    type Err = ParseAuthModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "federated" | "google" => Ok(Self::Federated),
            "anonymous" | "local" => Ok(Self::Anonymous),
            _ => Err(ParseAuthModeError(s.to_owned())),
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Token => "token",
            Self::Federated => "federated",
            Self::Anonymous => "anonymous",
        })
    }
}

/// Query parameters delivered to the federated redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code, on success.
    pub code: Option<String>,
    /// Provider-reported error, on cancellation or failure.
    pub error: Option<String>,
}

impl CallbackParams {
    /// Extract `code` and `error` from a full redirect URL.
    #[must_use]
    pub fn from_redirect_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => params.code = Some(value.into_owned()),
                "error" => params.error = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// What a user presents to establish a session.
#[derive(Clone)]
pub enum Credentials {
    /// Email and password.
    Password {
        /// Account email.
        email: Email,
        /// Account password.
        password: SecretString,
    },
    /// Result of a federated provider redirect.
    Federated(CallbackParams),
    /// Local-only identity.
    Anonymous {
        /// Optional display name.
        name: Option<String>,
    },
}

impl Credentials {
    /// Email/password credentials, validating the email.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` if the email is malformed.
    pub fn password(email: &str, password: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self::Password {
            email: Email::parse(email)?,
            password: SecretString::from(password.into()),
        })
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::Federated(_) => "federated",
            Self::Anonymous { .. } => "anonymous",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { email, .. } => f
                .debug_struct("Password")
                .field("email", email)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Federated(params) => f
                .debug_struct("Federated")
                .field("has_code", &params.code.is_some())
                .field("error", &params.error)
                .finish(),
            Self::Anonymous { name } => f.debug_struct("Anonymous").field("name", name).finish(),
        }
    }
}

/// Details collected by a signup form.
#[derive(Clone)]
pub struct RegistrationProfile {
    /// Account email.
    pub email: Email,
    /// Chosen password.
    pub password: SecretString,
    /// Display name.
    pub name: Option<String>,
}

impl RegistrationProfile {
    /// Validate signup input.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` if the email is malformed,
    /// `AuthError::WeakPassword` if the password is too short, or
    /// `AuthError::PasswordMismatch` if the confirmation differs.
    pub fn new(
        email: &str,
        password: &str,
        confirm_password: &str,
        name: Option<String>,
    ) -> Result<Self, AuthError> {
        let email = Email::parse(email)?;
        validate_password(password)?;
        if password != confirm_password {
            return Err(AuthError::PasswordMismatch);
        }
        Ok(Self {
            email,
            password: SecretString::from(password.to_string()),
            name: name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        })
    }
}

impl fmt::Debug for RegistrationProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationProfile")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("name", &self.name)
            .finish()
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// A strategy for turning credentials into a session.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Short provider name for logs and errors.
    fn name(&self) -> &'static str;

    /// Source recorded on sessions this provider creates.
    fn source(&self) -> SessionSource;

    /// Exchange credentials for a session.
    async fn authenticate(&self, credentials: Credentials) -> Result<Session, AuthError>;

    /// Create an account and return its session.
    async fn register(&self, profile: &RegistrationProfile) -> Result<Session, AuthError>;
}

impl Session {
    pub(crate) fn from_grant(grant: AuthGrant, source: SessionSource) -> Self {
        Self::new(grant.identity, Some(grant.access_token), source)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token
// ─────────────────────────────────────────────────────────────────────────────

/// Email/password sessions backed by the REST API.
pub struct TokenProvider {
    backend: Arc<dyn AuthBackend>,
}

impl TokenProvider {
    /// Create a provider using `backend` for auth calls.
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl AuthProvider for TokenProvider {
    fn name(&self) -> &'static str {
        "token"
    }

    fn source(&self) -> SessionSource {
        SessionSource::Token
    }

    #[instrument(skip(self, credentials), fields(kind = credentials.kind()))]
    async fn authenticate(&self, credentials: Credentials) -> Result<Session, AuthError> {
        let Credentials::Password { email, password } = credentials else {
            return Err(AuthError::UnsupportedCredentials {
                provider: self.name(),
                credentials: credentials.kind(),
            });
        };
        let grant = self.backend.login(&email, &password).await?;
        Ok(Session::from_grant(grant, self.source()))
    }

    #[instrument(skip(self, profile), fields(email = %profile.email))]
    async fn register(&self, profile: &RegistrationProfile) -> Result<Session, AuthError> {
        let grant = self
            .backend
            .register(&profile.email, &profile.password, profile.name.as_deref())
            .await?;
        Ok(Session::from_grant(grant, self.source()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Federated
// ─────────────────────────────────────────────────────────────────────────────

/// Sessions established through an external identity provider.
///
/// The user is sent to [`authorization_url`](Self::authorization_url); the
/// provider redirects back with a code that the backend exchanges for a token.
pub struct FederatedProvider {
    backend: Arc<dyn AuthBackend>,
    config: FederatedConfig,
}

impl FederatedProvider {
    /// Create a provider for the given identity provider settings.
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>, config: FederatedConfig) -> Self {
        Self { backend, config }
    }

    /// URL to send the user to in order to start a federated login.
    #[must_use]
    pub fn authorization_url(&self) -> Url {
        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", FEDERATED_SCOPES);
        url
    }
}

#[async_trait]
impl AuthProvider for FederatedProvider {
    fn name(&self) -> &'static str {
        "federated"
    }

    fn source(&self) -> SessionSource {
        SessionSource::Federated
    }

    #[instrument(skip(self, credentials), fields(kind = credentials.kind()))]
    async fn authenticate(&self, credentials: Credentials) -> Result<Session, AuthError> {
        let Credentials::Federated(params) = credentials else {
            return Err(AuthError::UnsupportedCredentials {
                provider: self.name(),
                credentials: credentials.kind(),
            });
        };

        if let Some(error) = params.error {
            return Err(AuthError::Federated(format!(
                "authentication was cancelled or failed ({error})"
            )));
        }
        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::Federated("no authorization code received".to_string()))?;

        let grant = self
            .backend
            .federated_callback(&code)
            .await
            .map_err(|e| match AuthError::from(e) {
                AuthError::InvalidCredentials(reason) | AuthError::Rejected(reason) => {
                    AuthError::Federated(reason)
                }
                other => other,
            })?;
        Ok(Session::from_grant(grant, self.source()))
    }

    async fn register(&self, _profile: &RegistrationProfile) -> Result<Session, AuthError> {
        Err(AuthError::RegistrationUnsupported(self.name()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Anonymous
// ─────────────────────────────────────────────────────────────────────────────

/// Placeholder address used for local-only identities.
const ANONYMOUS_EMAIL: &str = "anonymous@pricepulse.local";

/// Local-only sessions with no backend credential.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousProvider;

impl AnonymousProvider {
    fn session(name: Option<String>, email: Option<&Email>) -> Result<Session, AuthError> {
        let email = match email {
            Some(email) => email.clone(),
            None => Email::parse(ANONYMOUS_EMAIL)?,
        };
        let identity = Identity {
            id: UserId::new(uuid::Uuid::new_v4().to_string()),
            email,
            name,
        };
        Ok(Session::new(identity, None, SessionSource::Anonymous))
    }
}

#[async_trait]
impl AuthProvider for AnonymousProvider {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    fn source(&self) -> SessionSource {
        SessionSource::Anonymous
    }

    async fn authenticate(&self, credentials: Credentials) -> Result<Session, AuthError> {
        match credentials {
            Credentials::Anonymous { name } => Self::session(name, None),
            // The password is never checked locally; only the email is kept.
            Credentials::Password { email, .. } => Self::session(None, Some(&email)),
            Credentials::Federated(_) => Err(AuthError::UnsupportedCredentials {
                provider: self.name(),
                credentials: credentials.kind(),
            }),
        }
    }

    async fn register(&self, profile: &RegistrationProfile) -> Result<Session, AuthError> {
        Self::session(profile.name.clone(), Some(&profile.email))
    }
}
