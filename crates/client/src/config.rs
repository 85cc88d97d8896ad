//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `PRICEPULSE_API_URL` - Backend base URL (default: `http://localhost:8000`)
//! - `PRICEPULSE_AUTH_MODE` - `token`, `federated` or `anonymous` (default: `token`)
//! - `PRICEPULSE_SESSION_FILE` - Where the session is persisted (default: `.pricepulse/session.json`)
//! - `PRICEPULSE_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `PRICEPULSE_LIST_REFRESH_SECS` - Product list polling period (default: 300)
//! - `PRICEPULSE_DETAIL_REFRESH_SECS` - Product detail polling period (default: 1800)
//! - `PRICEPULSE_TRACK_MAX_ATTEMPTS` - Tracking registration attempts (default: 20)
//! - `PRICEPULSE_TRACK_RETRY_DELAY_MS` - Delay between registration attempts (default: 1000)
//!
//! ## Required in federated mode
//! - `PRICEPULSE_FEDERATED_CLIENT_ID` - OAuth client ID of the identity provider
//! - `PRICEPULSE_FEDERATED_REDIRECT_URI` - Callback URL registered with the provider
//!
//! ## Optional in federated mode
//! - `PRICEPULSE_FEDERATED_AUTHORIZE_URL` - Authorization endpoint
//!   (default: `https://accounts.google.com/o/oauth2/auth`)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::session::AuthMode;

/// Local development backend.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

const DEFAULT_SESSION_FILE: &str = ".pricepulse/session.json";
const DEFAULT_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/auth";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// PricePulse client configuration.
///
/// Built once at startup and handed to the gateway; nothing else reads the
/// environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL. Endpoint paths are joined onto it.
    pub api_base_url: Url,
    /// Which auth integration the session store uses.
    pub auth_mode: AuthMode,
    /// File holding the persisted credential and identity snapshot.
    pub session_file: PathBuf,
    /// Timeout applied to every backend request.
    pub request_timeout: Duration,
    /// Polling and retry timing.
    pub sync: SyncConfig,
    /// Federated identity settings (present in federated mode).
    pub federated: Option<FederatedConfig>,
}

/// Timing for polling and tracking retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Product list refresh period.
    pub list_refresh: Duration,
    /// Product detail refresh period.
    pub detail_refresh: Duration,
    /// Maximum registration attempts per tracking submission.
    pub track_max_attempts: u32,
    /// Fixed delay between registration attempts.
    pub track_retry_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            list_refresh: Duration::from_secs(5 * 60),
            detail_refresh: Duration::from_secs(30 * 60),
            track_max_attempts: 20,
            track_retry_delay: Duration::from_secs(1),
        }
    }
}

impl SyncConfig {
    /// Reject settings that would stall a timer or skip every attempt.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` naming the variable that sets the
    /// zero period or attempt count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = if self.list_refresh.is_zero() {
            Some("PRICEPULSE_LIST_REFRESH_SECS")
        } else if self.detail_refresh.is_zero() {
            Some("PRICEPULSE_DETAIL_REFRESH_SECS")
        } else if self.track_max_attempts == 0 {
            Some("PRICEPULSE_TRACK_MAX_ATTEMPTS")
        } else {
            None
        };
        match zero {
            Some(key) => Err(ConfigError::InvalidEnvVar(key.to_string(), "must be at least 1".to_string())),
            None => Ok(()),
        }
    }
}

/// Federated identity provider settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedConfig {
    /// OAuth client ID (public).
    pub client_id: String,
    /// Callback URL the provider redirects back to.
    pub redirect_uri: String,
    /// Provider authorization endpoint.
    pub authorize_url: Url,
}

impl ClientConfig {
    /// Configuration for `api_base_url` with every other setting at its default.
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            auth_mode: AuthMode::Token,
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
            request_timeout: Duration::from_secs(30),
            sync: SyncConfig::default(),
            federated: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is malformed, or if federated mode
    /// is selected without its required variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_base_url = parse_base_url(&get_env_or_default("PRICEPULSE_API_URL", DEFAULT_API_URL))?;
        let auth_mode: AuthMode = parse_env("PRICEPULSE_AUTH_MODE", "token")?;
        let session_file = PathBuf::from(get_env_or_default("PRICEPULSE_SESSION_FILE", DEFAULT_SESSION_FILE));
        let request_timeout = Duration::from_secs(parse_env("PRICEPULSE_REQUEST_TIMEOUT_SECS", "30")?);

        let sync = SyncConfig {
            list_refresh: Duration::from_secs(parse_env("PRICEPULSE_LIST_REFRESH_SECS", "300")?),
            detail_refresh: Duration::from_secs(parse_env("PRICEPULSE_DETAIL_REFRESH_SECS", "1800")?),
            track_max_attempts: parse_env("PRICEPULSE_TRACK_MAX_ATTEMPTS", "20")?,
            track_retry_delay: Duration::from_millis(parse_env("PRICEPULSE_TRACK_RETRY_DELAY_MS", "1000")?),
        };
        sync.validate()?;

        let federated = if auth_mode == AuthMode::Federated {
            Some(FederatedConfig::from_env()?)
        } else {
            None
        };

        Ok(Self {
            api_base_url,
            auth_mode,
            session_file,
            request_timeout,
            sync,
            federated,
        })
    }
}

impl FederatedConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let authorize_url = get_env_or_default("PRICEPULSE_FEDERATED_AUTHORIZE_URL", DEFAULT_AUTHORIZE_URL);
        Ok(Self {
            client_id: get_required_env("PRICEPULSE_FEDERATED_CLIENT_ID")?,
            redirect_uri: get_required_env("PRICEPULSE_FEDERATED_REDIRECT_URI")?,
            authorize_url: Url::parse(&authorize_url).map_err(|e| {
                ConfigError::InvalidEnvVar("PRICEPULSE_FEDERATED_AUTHORIZE_URL".to_string(), e.to_string())
            })?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse the backend base URL, normalizing it to end with a slash so
/// `Url::join` appends endpoint paths instead of replacing the last segment.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` if the URL is malformed or not HTTP(S).
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEnvVar("PRICEPULSE_API_URL".to_string(), reason);

    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) into `T`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = parse_base_url("https://api.example.com/v2").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/");
        assert_eq!(
            url.join("api/products").unwrap().as_str(),
            "https://api.example.com/v2/api/products"
        );
    }

    #[test]
    fn test_base_url_rejects_other_schemes() {
        assert!(matches!(
            parse_base_url("ftp://example.com"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn test_sync_defaults() {
        let sync = SyncConfig::default();
        assert_eq!(sync.list_refresh, Duration::from_secs(300));
        assert_eq!(sync.detail_refresh, Duration::from_secs(1800));
        assert_eq!(sync.track_max_attempts, 20);
        assert_eq!(sync.track_retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_zero_periods_rejected() {
        assert!(SyncConfig::default().validate().is_ok());

        let list = SyncConfig {
            list_refresh: Duration::ZERO,
            ..SyncConfig::default()
        };
        assert!(matches!(
            list.validate(),
            Err(ConfigError::InvalidEnvVar(ref key, _)) if key == "PRICEPULSE_LIST_REFRESH_SECS"
        ));

        let detail = SyncConfig {
            detail_refresh: Duration::ZERO,
            ..SyncConfig::default()
        };
        assert!(matches!(
            detail.validate(),
            Err(ConfigError::InvalidEnvVar(ref key, _)) if key == "PRICEPULSE_DETAIL_REFRESH_SECS"
        ));

        let attempts = SyncConfig {
            track_max_attempts: 0,
            ..SyncConfig::default()
        };
        assert!(attempts.validate().is_err());
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = ClientConfig::new(parse_base_url(DEFAULT_API_URL).unwrap());
        assert_eq!(config.auth_mode, AuthMode::Token);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.federated.is_none());
    }
}
