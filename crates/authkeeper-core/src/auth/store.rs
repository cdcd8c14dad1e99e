//! The session store: sole owner and writer of the process-wide session.
//!
//! The current session lives in a `watch` channel, so every subscriber sees
//! the latest value immediately on subscribe and every commit replaces the
//! value atomically. Commits go through one lock that also holds the
//! generation counter; explicit writes (`set_session`, `clear_session`,
//! `logout`) advance it, and a `load_session` that finds the generation moved
//! while it was awaiting the network drops its result.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, Stream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::session::{now_epoch, Credential, CredentialMode, Session, TokenBundle};
use super::storage::{
    load_bundle, open_storage, save_bundle, CredentialStorage, StorageError, ACCESS_TOKEN_KEY,
};
use crate::api::{AuthClient, AuthTransport, Carrier, LoginRedirect, TransportError};
use crate::config::{Config, HostContext};

/// Where the session lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session
    Empty,
    /// Persisted credential found and not expired
    Valid,
    /// Persisted credential found but expired
    Expired,
    /// Renewal request in flight
    Refreshing,
    /// Session committed
    Authenticated,
    /// Renewal denied; persisted state is being erased
    Failed,
}

/// What a commit does to persisted state.
enum StorageEffect {
    Keep,
    Persist(TokenBundle),
    Erase,
}

struct CommitState {
    generation: u64,
    phase: SessionPhase,
}

pub struct SessionStore {
    mode: CredentialMode,
    context: HostContext,
    transport: Arc<dyn AuthTransport>,
    storage: Arc<dyn CredentialStorage>,
    session: watch::Sender<Option<Session>>,
    state: Mutex<CommitState>,
    // Serializes overlapping loads so one expired credential is renewed once
    load_gate: tokio::sync::Mutex<()>,
}

impl SessionStore {
    pub fn new(
        config: &Config,
        transport: Arc<dyn AuthTransport>,
        storage: Arc<dyn CredentialStorage>,
    ) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            mode: config.credential_mode,
            context: config.host_context,
            transport,
            storage,
            session,
            state: Mutex::new(CommitState {
                generation: 0,
                phase: SessionPhase::Empty,
            }),
            load_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Build the store with the HTTP client and the configured storage backend
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = Arc::new(AuthClient::new(config)?);
        let storage = open_storage(config)?;
        Ok(Self::new(config, transport, storage))
    }

    // ===== Reading =====

    /// Receiver that always holds the latest session.
    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    /// Stream of session values: the current one first, then each commit.
    /// A slow consumer skips straight to the newest value.
    pub fn changes(&self) -> impl Stream<Item = Option<Session>> + Send + 'static {
        let rx = self.session.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let value = rx.borrow_and_update().clone();
            Some((value, (rx, false)))
        })
    }

    pub fn current(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session
            .borrow()
            .as_ref()
            .map(|s| s.is_authenticated())
            .unwrap_or(false)
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock_state().phase
    }

    // ===== Explicit writes =====

    /// Commit a session obtained elsewhere (e.g. a login callback).
    /// Token credentials are persisted; cookie credentials never are.
    pub fn set_session(&self, session: Session) {
        if session.mode() != self.mode {
            warn!(
                configured = ?self.mode,
                session = ?session.mode(),
                "Session credential does not match configured mode"
            );
        }

        let mut state = self.lock_state();
        state.generation += 1;
        if let Credential::Token(ref bundle) = session.credential {
            self.apply(StorageEffect::Persist(bundle.clone()));
        }
        self.publish(&mut state, SessionPhase::Authenticated, Some(session));
    }

    /// Local-only teardown: erase persisted state and commit no session
    pub fn clear_session(&self) {
        let mut state = self.lock_state();
        state.generation += 1;
        self.apply(StorageEffect::Erase);
        self.publish(&mut state, SessionPhase::Empty, None);
    }

    // ===== Network-backed operations =====

    /// URL to send the user to for the external login flow
    pub async fn begin_external_login(&self) -> Result<LoginRedirect, TransportError> {
        self.transport.begin_external_login().await
    }

    /// Exchange an ID token from the login callback and commit the result.
    pub async fn sign_in_with_id_token(&self, id_token: &str) -> Result<(), TransportError> {
        let grant = self.transport.exchange_id_token(id_token).await?;
        let session = match self.mode {
            CredentialMode::Token => Session::token(grant.bundle(), Some(grant.user)),
            CredentialMode::Cookie => Session::cookie(Some(grant.user)),
        };
        self.set_session(session);
        info!("Signed in with ID token");
        Ok(())
    }

    /// Restore the session from persisted state, renewing it if expired.
    ///
    /// Never fails: an unrecoverable problem ends in no session and erased
    /// persisted state. State that cannot be read right now (wrong passphrase,
    /// locked keyring) is left in place. Does nothing in a headless host context.
    pub async fn load_session(&self) {
        if !self.context.is_interactive() {
            debug!("Headless host context, skipping session load");
            return;
        }

        let _gate = self.load_gate.lock().await;
        let generation = self.lock_state().generation;

        match self.mode {
            CredentialMode::Token => self.load_token_session(generation).await,
            CredentialMode::Cookie => self.load_cookie_session(generation).await,
        }
    }

    async fn load_token_session(&self, generation: u64) {
        let bundle = match load_bundle(self.storage.as_ref()) {
            Ok(Some(bundle)) => bundle,
            Ok(None) => {
                debug!("No persisted credential");
                self.commit_if_current(generation, SessionPhase::Empty, None, StorageEffect::Keep);
                return;
            }
            Err(e @ (StorageError::Corrupt(_) | StorageError::Serialization(_))) => {
                warn!(error = %e, "Persisted credential corrupt, discarding");
                self.fail(generation);
                return;
            }
            Err(e) => {
                // Wrong passphrase or locked keyring: the credential may still be good
                warn!(error = %e, "Persisted credential unreadable, leaving it in place");
                self.commit_if_current(generation, SessionPhase::Empty, None, StorageEffect::Keep);
                return;
            }
        };

        let now = now_epoch();
        let bundle = if bundle.is_expired_at(now) {
            self.enter(generation, SessionPhase::Expired);
            self.enter(generation, SessionPhase::Refreshing);
            info!(expires_at = bundle.expires_at, "Credential expired, renewing");

            let renewed = match self
                .transport
                .renew_credential(Carrier::Token(&bundle.refresh_token))
                .await
            {
                Ok(Some(renewed)) if !renewed.is_expired_at(now_epoch()) => renewed,
                Ok(Some(renewed)) => {
                    error!(
                        expires_at = renewed.expires_at,
                        "Renewal returned an expired credential"
                    );
                    self.fail(generation);
                    return;
                }
                Ok(None) => {
                    error!("Renewal returned no credential");
                    self.fail(generation);
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Failed to refresh session");
                    self.fail(generation);
                    return;
                }
            };

            if !self.apply_if_current(generation, StorageEffect::Persist(renewed.clone())) {
                return;
            }
            renewed
        } else {
            bundle
        };
        self.enter(generation, SessionPhase::Valid);

        let user = match self
            .transport
            .get_current_user(Carrier::Token(&bundle.access_token))
            .await
        {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Failed to fetch user info, keeping credential");
                None
            }
        };

        self.commit_if_current(
            generation,
            SessionPhase::Authenticated,
            Some(Session::token(bundle, user)),
            StorageEffect::Keep,
        );
    }

    async fn load_cookie_session(&self, generation: u64) {
        match self.transport.get_current_user(Carrier::Cookie).await {
            Ok(user) => {
                self.commit_if_current(
                    generation,
                    SessionPhase::Authenticated,
                    Some(Session::cookie(Some(user))),
                    StorageEffect::Keep,
                );
                return;
            }
            Err(e) => {
                debug!(error = %e, "Cookie session not accepted, renewing");
            }
        }

        self.enter(generation, SessionPhase::Refreshing);
        if let Err(e) = self.transport.renew_credential(Carrier::Cookie).await {
            error!(error = %e, "Failed to refresh session");
            self.fail(generation);
            return;
        }
        self.enter(generation, SessionPhase::Valid);

        let user = match self.transport.get_current_user(Carrier::Cookie).await {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Failed to fetch user info after renewal, keeping session");
                None
            }
        };

        self.commit_if_current(
            generation,
            SessionPhase::Authenticated,
            Some(Session::cookie(user)),
            StorageEffect::Keep,
        );
    }

    /// End the session remotely (best-effort) and always clear it locally.
    pub async fn logout(&self) {
        if self.context.is_interactive() {
            let access_token = self.access_token_for_logout();
            let carrier = match self.mode {
                CredentialMode::Cookie => Some(Carrier::Cookie),
                CredentialMode::Token => access_token.as_deref().map(Carrier::Token),
            };

            match carrier {
                Some(carrier) => {
                    if let Err(e) = self.transport.end_session(carrier).await {
                        warn!(error = %e, "Logout error, clearing local session anyway");
                    }
                }
                None => debug!("No credential to end remotely"),
            }
        }

        self.clear_session();
        info!("Logged out");
    }

    fn access_token_for_logout(&self) -> Option<String> {
        if let Some(token) = self
            .session
            .borrow()
            .as_ref()
            .and_then(|s| s.access_token())
        {
            return Some(token.to_string());
        }
        match self.storage.get(ACCESS_TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read persisted access token");
                None
            }
        }
    }

    // ===== Commit plumbing =====

    fn lock_state(&self) -> MutexGuard<'_, CommitState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(state: &mut CommitState, phase: SessionPhase) {
        if state.phase != phase {
            debug!(from = ?state.phase, to = ?phase, "Session phase transition");
            state.phase = phase;
        }
    }

    fn publish(&self, state: &mut CommitState, phase: SessionPhase, session: Option<Session>) {
        Self::set_phase(state, phase);
        self.session.send_replace(session);
    }

    /// Apply a storage effect. Failures are logged; in-memory state still wins.
    fn apply(&self, effect: StorageEffect) {
        if !self.context.is_interactive() {
            return;
        }
        let result = match effect {
            StorageEffect::Keep => Ok(()),
            StorageEffect::Persist(ref bundle) => save_bundle(self.storage.as_ref(), bundle),
            StorageEffect::Erase => self.storage.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to update persisted credential");
        }
    }

    fn enter(&self, generation: u64, phase: SessionPhase) {
        let mut state = self.lock_state();
        if state.generation == generation {
            Self::set_phase(&mut state, phase);
        }
    }

    fn apply_if_current(&self, generation: u64, effect: StorageEffect) -> bool {
        let state = self.lock_state();
        if state.generation != generation {
            debug!(
                started = generation,
                current = state.generation,
                "Discarding superseded session load"
            );
            return false;
        }
        self.apply(effect);
        true
    }

    fn commit_if_current(
        &self,
        generation: u64,
        phase: SessionPhase,
        session: Option<Session>,
        effect: StorageEffect,
    ) {
        let mut state = self.lock_state();
        if state.generation != generation {
            debug!(
                started = generation,
                current = state.generation,
                "Discarding superseded session load"
            );
            return;
        }
        self.apply(effect);
        self.publish(&mut state, phase, session);
    }

    /// Renewal denied or state unusable: FAILED, then EMPTY with storage erased
    fn fail(&self, generation: u64) {
        self.enter(generation, SessionPhase::Failed);
        self.commit_if_current(generation, SessionPhase::Empty, None, StorageEffect::Erase);
    }
}
