//! Authkeeper core - client-side session management against a remote
//! authentication authority.
//!
//! The authority issues credentials (an explicit access/refresh token pair, or
//! an authority-managed cookie); this crate keeps the current session, renews
//! it when it expires, persists it where configured, and tears it down on
//! logout.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{AuthClient, AuthTransport, TransportError};
pub use auth::{Credential, CredentialMode, Session, SessionPhase, SessionStore, TokenBundle};
pub use config::Config;
pub use models::User;
