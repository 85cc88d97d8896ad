//! Email addresses for accounts and alert notifications.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Why an address was rejected.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailError {
    /// Nothing was entered.
    #[error("email is required")]
    Empty,
    /// Longer than [`Email::MAX_LENGTH`].
    #[error("email must be at most {} characters", Email::MAX_LENGTH)]
    TooLong,
    /// Not of the form `name@domain.tld`.
    #[error("invalid email address: {0}")]
    Malformed(&'static str),
}

/// A validated email address.
///
/// Surrounding whitespace is trimmed and the domain is lowercased, so an
/// address typed into a prompt compares equal to the one the backend returns.
///
/// ```
/// use pricepulse_core::Email;
///
/// let email = Email::parse("  Deals@Shop.Example ").unwrap();
/// assert_eq!(email.as_str(), "Deals@shop.example");
/// assert!(Email::parse("user@localhost").is_err());
/// ```
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    /// RFC 5321 path limit.
    pub const MAX_LENGTH: usize = 254;

    /// Validate and normalize `input`.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError`] for empty, over-long or malformed input.
    pub fn parse(input: &str) -> Result<Self, EmailError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EmailError::Empty);
        }
        if input.len() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong);
        }

        let Some((local, domain)) = input.split_once('@') else {
            return Err(EmailError::Malformed("missing @"));
        };
        let problem = if input.chars().any(char::is_whitespace) {
            Some("contains whitespace")
        } else if local.is_empty() {
            Some("missing name before @")
        } else if domain.contains('@') {
            Some("more than one @")
        } else if !domain.contains('.') || domain.split('.').any(str::is_empty) {
            Some("domain must look like example.com")
        } else {
            None
        };
        if let Some(problem) = problem {
            return Err(EmailError::Malformed(problem));
        }

        Ok(Self(format!("{local}@{}", domain.to_ascii_lowercase())))
    }

    /// The address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the `@`; used as a fallback display name.
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(local, _)| local)
    }
}

// A tampered identity snapshot must fail to load.
impl<'de> Deserialize<'de> for Email {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Email {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
