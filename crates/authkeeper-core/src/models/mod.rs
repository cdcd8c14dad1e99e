//! Data models shared between the transport client and the session store.
//!
//! - `User`: profile snapshot returned by the authority

pub mod user;

pub use user::{Metadata, User};
