//! Session lifecycle management.
//!
//! The `SessionManager` owns every transition between the anonymous and
//! authenticated states, keeps the persisted store and the in-memory state
//! in lockstep, and publishes a forced-logout event when the backend rejects
//! the session. It is an explicit, injectable object: construct it with a
//! store and a credential verifier and hand clones to whoever needs it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::store::{SessionStore, KEY_AUTH_TOKEN, KEY_USERNAME};
use super::AuthError;

/// The authenticated identity and bearer token held by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub token: String,
    /// Advisory expiry from the token endpoint, when it reports one.
    /// Invalidation is driven by 401 responses, not by this timestamp.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Observable lifecycle phase, used by the route guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// `initialize()` has not run yet
    Uninitialized,
    Anonymous,
    /// A login attempt is in flight
    Authenticating,
    Authenticated,
}

/// How `initialize()` treats a persisted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Trust the persisted token without a network round trip
    TrustLocalToken,
    /// Probe the whoami endpoint; any failure clears the persisted session
    ValidateOnLoad,
}

/// Out-of-band notifications from the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The backend rejected the session; the consumer must navigate to the
    /// login entry point.
    ForcedLogout,
}

/// Token cell shared with the API client. The session manager is the sole
/// writer and only touches it at transition points.
pub type SharedToken = Arc<RwLock<Option<String>>>;

/// External credential verification, backed by the management API's auth
/// routes in production and by a fixed rule in tests.
pub trait CredentialVerifier: Send + Sync {
    /// Exchange credentials for a session.
    fn verify_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, AuthError>> + Send;

    /// Check a persisted token, returning the username it belongs to.
    fn validate_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<String, AuthError>> + Send;
}

enum State {
    Uninitialized,
    Anonymous,
    /// `prev` is restored if the in-flight login fails, so readers never see
    /// a rejected attempt disturb the existing session.
    Authenticating { prev: Option<Session> },
    Authenticated(Session),
}

struct Core<S> {
    state: State,
    store: S,
}

struct Inner<S, V> {
    core: RwLock<Core<S>>,
    verifier: V,
    token: SharedToken,
    login_gate: AtomicBool,
    events: mpsc::UnboundedSender<SessionEvent>,
}

pub struct SessionManager<S, V> {
    inner: Arc<Inner<S, V>>,
}

impl<S, V> Clone for SessionManager<S, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SessionStore, V: CredentialVerifier> SessionManager<S, V> {
    /// Build a manager around a persisted store and a verifier. The returned
    /// receiver carries forced-logout notifications.
    pub fn new(
        store: S,
        verifier: V,
        token: SharedToken,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(Inner {
                core: RwLock::new(Core {
                    state: State::Uninitialized,
                    store,
                }),
                verifier,
                token,
                login_gate: AtomicBool::new(false),
                events: tx,
            }),
        };
        (manager, rx)
    }

    fn core_read(&self) -> std::sync::RwLockReadGuard<'_, Core<S>> {
        self.inner.core.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn core_write(&self) -> std::sync::RwLockWriteGuard<'_, Core<S>> {
        self.inner.core.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_shared_token(&self, token: Option<String>) {
        *self
            .inner
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Remove both persisted keys, logging rather than failing: clearing is
    /// part of the logout/invalidation paths and must always complete.
    fn clear_store(store: &mut S) {
        for key in [KEY_AUTH_TOKEN, KEY_USERNAME] {
            if let Err(e) = store.remove(key) {
                warn!(key, error = %e, "Failed to clear persisted session key");
            }
        }
    }

    /// Write both keys, or neither.
    fn persist(store: &mut S, session: &Session) -> Result<(), AuthError> {
        store.set(KEY_AUTH_TOKEN, &session.token)?;
        if let Err(e) = store.set(KEY_USERNAME, &session.username) {
            let _ = store.remove(KEY_AUTH_TOKEN);
            return Err(e);
        }
        Ok(())
    }

    /// Run once at startup. Restores a persisted session when both keys are
    /// present (optionally validating it against the backend), clears
    /// inconsistent partial state, and settles into a definite phase. Always
    /// resolves: the validation probe is bounded by the HTTP client timeout.
    pub async fn initialize(&self, mode: InitMode) {
        let (token, username) = {
            let core = self.core_read();
            (core.store.get(KEY_AUTH_TOKEN), core.store.get(KEY_USERNAME))
        };

        match (token, username) {
            (Some(token), Some(username)) => match mode {
                InitMode::TrustLocalToken => {
                    debug!(%username, "Restoring persisted session");
                    self.enter_authenticated(Session {
                        username,
                        token,
                        expires_at: None,
                    });
                }
                InitMode::ValidateOnLoad => {
                    match self.inner.verifier.validate_token(&token).await {
                        Ok(verified) => {
                            debug!(username = %verified, "Persisted token validated");
                            self.enter_authenticated(Session {
                                username: verified,
                                token,
                                expires_at: None,
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Persisted token failed validation, clearing");
                            self.settle_anonymous(true);
                        }
                    }
                }
            },
            (None, None) => self.settle_anonymous(false),
            _ => {
                warn!("Persisted session is missing one of token/username, clearing both");
                self.settle_anonymous(true);
            }
        }
    }

    fn enter_authenticated(&self, session: Session) {
        let mut core = self.core_write();
        self.set_shared_token(Some(session.token.clone()));
        core.state = State::Authenticated(session);
    }

    fn settle_anonymous(&self, clear: bool) {
        let mut core = self.core_write();
        if clear {
            Self::clear_store(&mut core.store);
        }
        self.set_shared_token(None);
        core.state = State::Anonymous;
    }

    /// Attempt a login. At most one attempt is in flight per manager; a
    /// concurrent call is rejected with `AuthError::LoginInProgress`.
    /// On failure nothing is persisted and `current_session()` is unchanged.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        if self
            .inner
            .login_gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AuthError::LoginInProgress);
        }

        {
            let mut core = self.core_write();
            let prev = match std::mem::replace(&mut core.state, State::Anonymous) {
                State::Authenticated(s) => Some(s),
                _ => None,
            };
            core.state = State::Authenticating { prev };
        }

        let result = self
            .inner
            .verifier
            .verify_credentials(username, password)
            .await;

        let outcome = match result {
            Ok(session) => {
                let mut core = self.core_write();
                match Self::persist(&mut core.store, &session) {
                    Ok(()) => {
                        self.set_shared_token(Some(session.token.clone()));
                        core.state = State::Authenticated(session.clone());
                        info!(username = %session.username, "Login successful");
                        Ok(session)
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to persist session, rolling back");
                        Self::resolve_failed_attempt(&mut core.state);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Login attempt failed");
                let mut core = self.core_write();
                Self::resolve_failed_attempt(&mut core.state);
                Err(e)
            }
        };

        self.inner.login_gate.store(false, Ordering::Release);
        outcome
    }

    /// Settle AUTHENTICATING back to whatever preceded it.
    fn resolve_failed_attempt(state: &mut State) {
        if let State::Authenticating { prev } = std::mem::replace(state, State::Anonymous) {
            if let Some(session) = prev {
                *state = State::Authenticated(session);
            }
        }
    }

    /// Clear the persisted session and return to anonymous. Calling this
    /// while already anonymous is a no-op, not an error.
    pub fn logout(&self) {
        let mut core = self.core_write();
        Self::clear_store(&mut core.store);
        self.set_shared_token(None);
        core.state = State::Anonymous;
        debug!("Session cleared");
    }

    /// Invoked by the network boundary when the backend reports the session
    /// invalid. Performs the logout transition and emits a single
    /// `ForcedLogout` event; repeated or concurrent invocations collapse to
    /// one transition because the state write lock serializes them.
    pub fn on_unauthorized(&self) {
        let mut core = self.core_write();
        if matches!(core.state, State::Anonymous) {
            return;
        }
        Self::clear_store(&mut core.store);
        self.set_shared_token(None);
        core.state = State::Anonymous;
        info!("Backend rejected the session, forcing logout");
        let _ = self.inner.events.send(SessionEvent::ForcedLogout);
    }

    /// Pure read of the in-memory session; never touches persisted storage.
    /// While a login is in flight this reports the pre-attempt session.
    pub fn current_session(&self) -> Option<Session> {
        match &self.core_read().state {
            State::Authenticated(session) => Some(session.clone()),
            State::Authenticating { prev } => prev.clone(),
            _ => None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match &self.core_read().state {
            State::Uninitialized => SessionPhase::Uninitialized,
            State::Anonymous => SessionPhase::Anonymous,
            State::Authenticating { .. } => SessionPhase::Authenticating,
            State::Authenticated(_) => SessionPhase::Authenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionPhase::Authenticated
    }
}
