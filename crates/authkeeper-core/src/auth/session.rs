use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::User;

/// How the credential travels between this client and the authority.
/// Chosen once per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    /// Opaque handle in an authority-managed cookie; nothing is persisted locally
    Cookie,
    /// Explicit access/refresh pair held and persisted by the client
    #[default]
    Token,
}

impl std::str::FromStr for CredentialMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cookie" => Ok(CredentialMode::Cookie),
            "token" => Ok(CredentialMode::Token),
            other => Err(format!("unknown credential mode: {}", other)),
        }
    }
}

/// Explicit credential pair with its expiry in epoch seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

// Token material stays out of logs; only lengths are shown.
impl fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &format_args!("<{} chars>", self.access_token.len()))
            .field("refresh_token", &format_args!("<{} chars>", self.refresh_token.len()))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl TokenBundle {
    /// Expired means `expires_at <= now`
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_epoch())
    }

    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - now_epoch()).max(0)
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }
}

/// Credential state held by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Credential {
    Cookie,
    Token(TokenBundle),
}

/// The client-held record of who is signed in.
///
/// A `Session` only exists after the authority accepted a credential; the
/// signed-out state is the absence of a session (`None` in the store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub credential: Credential,
    pub user: Option<User>,
}

impl Session {
    pub fn cookie(user: Option<User>) -> Self {
        Self {
            credential: Credential::Cookie,
            user,
        }
    }

    pub fn token(bundle: TokenBundle, user: Option<User>) -> Self {
        Self {
            credential: Credential::Token(bundle),
            user,
        }
    }

    pub fn mode(&self) -> CredentialMode {
        match self.credential {
            Credential::Cookie => CredentialMode::Cookie,
            Credential::Token(_) => CredentialMode::Token,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        match &self.credential {
            Credential::Cookie => true,
            Credential::Token(bundle) => !bundle.access_token.is_empty(),
        }
    }

    pub fn tokens(&self) -> Option<&TokenBundle> {
        match &self.credential {
            Credential::Token(bundle) => Some(bundle),
            Credential::Cookie => None,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens().map(|t| t.access_token.as_str())
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }
}

/// Current wall-clock time in epoch seconds
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}
