//! Session identity types shared by every auth integration.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Email, UserId};

/// Who the current user is.
///
/// This is the identity snapshot persisted next to the credential token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Backend user ID (or a locally generated one for anonymous sessions).
    pub id: UserId,
    /// Account email.
    pub email: Email,
    /// Display name, if the user provided one.
    #[serde(default)]
    pub name: Option<String>,
}

impl Identity {
    /// Name to greet the user with, falling back to the email local part.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.email.local_part())
    }
}

/// Which integration style established a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    /// Local-only session with no backend credential.
    Anonymous,
    /// Established through a federated identity provider callback.
    Federated,
    /// Established with email/password against the REST backend.
    Token,
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Anonymous => "anonymous",
            Self::Federated => "federated",
            Self::Token => "token",
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_fallback() {
        let identity = Identity {
            id: UserId::new("u1"),
            email: Email::parse("jo@example.com").unwrap(),
            name: Some("  ".to_string()),
        };
        assert_eq!(identity.display_name(), "jo");
    }

    #[test]
    fn test_identity_without_name_deserializes() {
        let identity: Identity =
            serde_json::from_str(r#"{"id":"u1","email":"jo@example.com"}"#).unwrap();
        assert!(identity.name.is_none());
    }
}
