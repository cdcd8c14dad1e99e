//! Auth transport client for the remote authority.
//!
//! This module provides the `AuthClient` (reqwest-backed) and the
//! `AuthTransport` trait the session store talks through. Every operation is
//! a single request; retry policy belongs to the caller.

pub mod client;
pub mod error;
pub mod transport;

pub use client::AuthClient;
pub use error::{TransportError, TransportErrorKind};
pub use transport::{AuthTransport, Carrier, LoginRedirect, SessionGrant};
