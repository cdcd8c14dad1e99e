//! Session management.
//!
//! This module provides:
//! - `Session`: the credential plus the user the authority vouched for
//! - `SessionStore`: sole writer of the current session, with load/renew/logout
//! - `CredentialStorage`: key/value persistence (memory, file, OS keyring)

pub mod credentials;
pub mod sealed;
pub mod session;
pub mod storage;
pub mod store;

pub use credentials::KeyringStorage;
pub use session::{now_epoch, Credential, CredentialMode, Session, TokenBundle};
pub use storage::{
    load_bundle, open_storage, save_bundle, CredentialStorage, FileStorage, MemoryStorage,
    StorageError,
};
pub use store::{SessionPhase, SessionStore};
