//! The seam between the session store and whatever talks to the authority.

use async_trait::async_trait;
use serde::Deserialize;

use super::TransportError;
use crate::auth::session::{now_epoch, TokenBundle};
use crate::models::User;

/// How a call proves identity to the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier<'a> {
    /// Rely on the cookie jar; no token is sent explicitly
    Cookie,
    /// Send the given token in the request
    Token(&'a str),
}

/// Where to send the user to start the external login flow.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginRedirect {
    #[serde(alias = "url")]
    pub authorization_url: String,
}

/// Credentials issued by the authority after an ID-token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub token_type: String,
    pub user: User,
}

impl SessionGrant {
    /// Token bundle for persistence; `expires_at` falls back to `now + expires_in`
    pub fn bundle(&self) -> TokenBundle {
        TokenBundle {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self
                .expires_at
                .unwrap_or_else(|| now_epoch().saturating_add(self.expires_in)),
        }
    }
}

/// Single-shot operations against the authority. No implementation retries.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn begin_external_login(&self) -> Result<LoginRedirect, TransportError>;

    async fn exchange_id_token(&self, id_token: &str) -> Result<SessionGrant, TransportError>;

    /// Renew the credential. Returns the new bundle when a token was sent,
    /// `None` for cookie renewal where the authority only updates the cookie.
    async fn renew_credential(
        &self,
        carrier: Carrier<'_>,
    ) -> Result<Option<TokenBundle>, TransportError>;

    async fn get_current_user(&self, carrier: Carrier<'_>) -> Result<User, TransportError>;

    async fn end_session(&self, carrier: Carrier<'_>) -> Result<(), TransportError>;
}
