//! Session store: the current identity and its credential.
//!
//! [`SessionStore`] is created once at the composition root and shared by
//! `Arc`. It owns the credential persistence lifecycle and tells registered
//! [`SessionObserver`]s about every identity transition.
//!
//! # Identity epochs
//!
//! Each transition starts a new epoch with a fresh [`CancellationToken`].
//! The token handed to observers is cancelled when the next transition
//! happens, so anything an observer starts for one identity (a push
//! connection, a fetch) can be bound to that identity's lifetime.
//!
//! ```text
//!   restore()      login()        logout()
//!  ──────────┬──────────────┬──────────────┬──────►
//!   epoch 1  │   epoch 2    │   epoch 3    │
//!   (none)   │  (identity)  │   (none)     │
//!            └─ token 1     └─ token 2     └─ token 3
//!               cancelled      cancelled
//! ```
//!
//! Observers run synchronously, in registration order, while the transition
//! is being published. They must not start another transition from inside
//! the callback; spawn a task instead.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::credential::{self, CredentialError, Identity, Role};
use crate::keyring::CredentialStore;
use crate::server::{AuthApi, RegisterProfile, RegisterResponse};

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The auth collaborator rejected the request or could not be reached.
    AuthenticationFailed(String),
    /// The server issued a credential that cannot be decoded or is already expired.
    MalformedCredential(CredentialError),
    /// The registration profile was rejected before contacting the server.
    InvalidProfile(String),
    /// The credential store failed.
    Storage(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthenticationFailed(detail) => write!(f, "Authentication failed: {detail}"),
            Self::MalformedCredential(err) => write!(f, "Server issued an unusable credential: {err}"),
            Self::InvalidProfile(msg) => write!(f, "Invalid profile: {msg}"),
            Self::Storage(msg) => write!(f, "Credential storage failed: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// One identity transition, as seen by observers.
#[derive(Debug, Clone)]
pub struct IdentityChange {
    /// Epoch started by this transition.
    pub epoch: u64,
    /// Identity before the transition.
    pub previous: Option<Identity>,
    /// Identity after the transition.
    pub current: Option<Identity>,
    /// Credential backing `current`.
    pub credential: Option<String>,
    /// Cancelled when the next transition happens.
    pub cancel: CancellationToken,
}

impl IdentityChange {
    /// `none -> present`.
    pub fn became_present(&self) -> bool {
        self.previous.is_none() && self.current.is_some()
    }

    /// `present -> none`.
    pub fn became_absent(&self) -> bool {
        self.previous.is_some() && self.current.is_none()
    }

    /// `present -> present` with a different identity (re-login).
    pub fn replaced(&self) -> bool {
        self.previous.is_some() && self.current.is_some()
    }
}

/// Receives identity transitions from a [`SessionStore`].
pub trait SessionObserver: Send + Sync {
    /// Called once per transition, in order.
    fn on_identity_change(&self, change: &IdentityChange);
}

impl<F> SessionObserver for F
where
    F: Fn(&IdentityChange) + Send + Sync,
{
    fn on_identity_change(&self, change: &IdentityChange) {
        self(change);
    }
}

/// Handle returned by [`SessionStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct SessionState {
    identity: Option<Identity>,
    credential: Option<String>,
    epoch: u64,
    cancel: CancellationToken,
}

/// Holds the current identity and publishes its transitions.
pub struct SessionStore {
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn CredentialStore>,
    state: Mutex<SessionState>,
    observers: Mutex<Vec<(ObserverId, Arc<dyn SessionObserver>)>>,
    next_observer: Mutex<u64>,
    /// Held from touching the credential store through publishing the
    /// change, so the stored credential and the identity move together and
    /// observers see transitions in order.
    transition_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("SessionStore state mutex poisoned");
        f.debug_struct("SessionStore")
            .field("identity", &state.identity)
            .field("epoch", &state.epoch)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create an unauthenticated store. Call [`Self::restore`] once observers
    /// are registered.
    pub fn new(auth: Arc<dyn AuthApi>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            auth,
            store,
            state: Mutex::new(SessionState {
                identity: None,
                credential: None,
                epoch: 0,
                cancel: CancellationToken::new(),
            }),
            observers: Mutex::new(Vec::new()),
            next_observer: Mutex::new(0),
            transition_lock: Mutex::new(()),
        }
    }

    /// Register an observer for all future transitions.
    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        let id = {
            let mut next = self.next_observer.lock().expect("SessionStore observer id mutex poisoned");
            *next += 1;
            ObserverId(*next)
        };
        self.observers
            .lock()
            .expect("SessionStore observers mutex poisoned")
            .push((id, observer));
        id
    }

    /// Remove a previously registered observer.
    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers
            .lock()
            .expect("SessionStore observers mutex poisoned")
            .retain(|(existing, _)| *existing != id);
    }

    /// Current identity, if authenticated.
    pub fn current(&self) -> Option<Identity> {
        self.state
            .lock()
            .expect("SessionStore state mutex poisoned")
            .identity
            .clone()
    }

    /// Credential backing the current identity.
    pub fn credential(&self) -> Option<String> {
        self.state
            .lock()
            .expect("SessionStore state mutex poisoned")
            .credential
            .clone()
    }

    /// Current epoch number.
    pub fn epoch(&self) -> u64 {
        self.state.lock().expect("SessionStore state mutex poisoned").epoch
    }

    /// Whether an identity is present.
    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Capability check against the current identity.
    ///
    /// Always `false` when unauthenticated.
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.current()
            .is_some_and(|identity| credential::has_any_role(&identity, roles))
    }

    /// Load the persisted credential and publish the outcome.
    ///
    /// A credential that fails to decode or has expired is discarded and the
    /// session stays unauthenticated. The outcome is published even when no
    /// identity results.
    pub fn restore(&self) -> Option<Identity> {
        let ordering = self.lock_transitions();
        let stored = match self.store.load() {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("[Session] Could not read stored credential: {e:#}");
                None
            }
        };

        let next = stored.and_then(|token| match credential::decode_valid(&token, Utc::now()) {
            Ok(identity) => Some((identity, token)),
            Err(err) => {
                log::warn!("[Session] Discarding stored credential: {err}");
                if let Err(e) = self.store.clear() {
                    log::warn!("[Session] Failed to clear stored credential: {e:#}");
                }
                None
            }
        });

        match &next {
            Some((identity, _)) => log::info!(
                "[Session] Restored session for {} ({})",
                identity.subject(),
                identity.role()
            ),
            None => log::info!("[Session] No stored session"),
        }

        let identity = next.as_ref().map(|(identity, _)| identity.clone());
        self.transition(&ordering, next);
        identity
    }

    /// Log in and make the issued credential current.
    ///
    /// On failure the current identity is left untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, SessionError> {
        let response = self.auth.login(email, password).await.map_err(|e| {
            log::warn!("[Session] Login failed for {}: {}", email, e);
            SessionError::AuthenticationFailed(e.detail().to_string())
        })?;

        let identity = credential::decode_valid(&response.token, Utc::now())
            .map_err(SessionError::MalformedCredential)?;

        let ordering = self.lock_transitions();
        self.store
            .save(&response.token)
            .map_err(|e| SessionError::Storage(format!("{e:#}")))?;

        log::info!(
            "[Session] Logged in as {} ({}), credential {}",
            identity.subject(),
            identity.role(),
            credential::redact(&response.token)
        );

        self.transition(&ordering, Some((identity.clone(), response.token)));
        Ok(identity)
    }

    /// Create an account. The current identity is not changed.
    pub async fn register(&self, profile: &RegisterProfile) -> Result<RegisterResponse, SessionError> {
        if !matches!(profile.role, Role::Customer | Role::Provider) {
            return Err(SessionError::InvalidProfile(format!(
                "{} cannot self-register",
                profile.role
            )));
        }

        self.auth.register(profile).await.map_err(|e| {
            log::warn!("[Session] Registration failed for {}: {}", profile.email, e);
            SessionError::AuthenticationFailed(e.detail().to_string())
        })
    }

    /// Clear the credential and the identity. No network call.
    ///
    /// Observers have torn down their per-identity resources by the time this
    /// returns. The identity is cleared even when the store fails to delete
    /// the credential; that failure is returned afterwards. Without an
    /// identity nothing is published.
    pub fn logout(&self) -> Result<(), SessionError> {
        let ordering = self.lock_transitions();
        let cleared = self.store.clear();
        if self.is_authenticated() {
            self.transition(&ordering, None);
            log::info!("[Session] Logged out");
        } else {
            log::debug!("[Session] Logout without a session");
        }
        cleared.map_err(|e| SessionError::Storage(format!("{e:#}")))
    }

    /// Clear the session if the current identity has expired at `now`.
    ///
    /// Returns `true` when an expired identity was cleared.
    pub fn expire_if_due(&self, now: DateTime<Utc>) -> bool {
        let ordering = self.lock_transitions();
        let expired = self
            .current()
            .is_some_and(|identity| credential::is_expired(&identity, now));
        if expired {
            log::info!("[Session] Credential expired, ending session");
            if let Err(e) = self.store.clear() {
                log::warn!("[Session] Failed to clear expired credential: {e:#}");
            }
            self.transition(&ordering, None);
        }
        expired
    }

    fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transition_lock
            .lock()
            .expect("SessionStore transition mutex poisoned")
    }

    /// Replace the identity, start a new epoch, and publish the change.
    ///
    /// The caller holds the guard from [`Self::lock_transitions`] and has
    /// already brought the credential store in line with `next`.
    fn transition(&self, _ordering: &MutexGuard<'_, ()>, next: Option<(Identity, String)>) {
        let change = {
            let mut state = self.state.lock().expect("SessionStore state mutex poisoned");
            state.cancel.cancel();

            let previous = state.identity.take();
            let (identity, credential) = match next {
                Some((identity, credential)) => (Some(identity), Some(credential)),
                None => (None, None),
            };

            state.epoch += 1;
            state.cancel = CancellationToken::new();
            state.identity = identity.clone();
            state.credential = credential.clone();

            IdentityChange {
                epoch: state.epoch,
                previous,
                current: identity,
                credential,
                cancel: state.cancel.clone(),
            }
        };

        let observers: Vec<Arc<dyn SessionObserver>> = self
            .observers
            .lock()
            .expect("SessionStore observers mutex poisoned")
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        log::debug!(
            "[Session] Epoch {} ({} -> {}), notifying {} observer(s)",
            change.epoch,
            change.previous.as_ref().map_or("none", Identity::subject),
            change.current.as_ref().map_or("none", Identity::subject),
            observers.len()
        );

        for observer in observers {
            observer.on_identity_change(&change);
        }
    }
}

/// Ends the session when the current credential expires.
///
/// Register it like any other observer. Each identity gets a timer bound to
/// its epoch; the timer is dropped when the identity changes first.
#[derive(Debug)]
pub struct ExpiryWatch {
    session: Weak<SessionStore>,
}

impl ExpiryWatch {
    /// Watch `session`. Holds only a weak reference.
    pub fn new(session: &Arc<SessionStore>) -> Self {
        Self {
            session: Arc::downgrade(session),
        }
    }
}

impl SessionObserver for ExpiryWatch {
    fn on_identity_change(&self, change: &IdentityChange) {
        let Some(identity) = &change.current else {
            return;
        };
        let deadline = identity.expires_at();
        let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
        let session = Weak::clone(&self.session);
        let cancel = change.cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(remaining) => {
                    if let Some(session) = session.upgrade() {
                        session.expire_if_due(Utc::now().max(deadline));
                    }
                }
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::server::{ApiError, LoginResponse};
    use async_trait::async_trait;

    /// Auth collaborator returning a scripted login result.
    #[derive(Debug)]
    pub struct FakeAuth {
        pub login_result: Mutex<Result<String, ApiError>>,
        pub login_calls: Mutex<Vec<(String, String)>>,
        pub register_calls: Mutex<Vec<RegisterProfile>>,
    }

    impl FakeAuth {
        pub fn issuing(token: impl Into<String>) -> Self {
            Self {
                login_result: Mutex::new(Ok(token.into())),
                login_calls: Mutex::new(Vec::new()),
                register_calls: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(err: ApiError) -> Self {
            Self {
                login_result: Mutex::new(Err(err)),
                login_calls: Mutex::new(Vec::new()),
                register_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AuthApi for FakeAuth {
        async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
            self.login_calls
                .lock()
                .unwrap()
                .push((email.to_string(), password.to_string()));
            self.login_result.lock().unwrap().clone().map(|token| LoginResponse {
                token,
                token_type: Some("Bearer".to_string()),
                email: Some(email.to_string()),
                roles: Vec::new(),
            })
        }

        async fn register(&self, profile: &RegisterProfile) -> Result<RegisterResponse, ApiError> {
            self.register_calls.lock().unwrap().push(profile.clone());
            Ok(RegisterResponse {
                message: Some("User registered successfully!".to_string()),
            })
        }
    }

    /// Observer recording every change it sees.
    #[derive(Debug, Default)]
    pub struct RecordingObserver {
        pub changes: Mutex<Vec<IdentityChange>>,
    }

    impl SessionObserver for RecordingObserver {
        fn on_identity_change(&self, change: &IdentityChange) {
            self.changes.lock().unwrap().push(change.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{FakeAuth, RecordingObserver};
    use super::*;
    use crate::credential::test_support::make_token;
    use crate::keyring::MemoryStore;
    use crate::server::ApiError;

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 3600
    }

    fn provider_token() -> String {
        make_token("p@x.com", "ROLE_PROVIDER", serde_json::json!("u1"), future_exp())
    }

    fn store_with(
        auth: FakeAuth,
        creds: MemoryStore,
    ) -> (SessionStore, Arc<MemoryStore>, Arc<RecordingObserver>) {
        let creds = Arc::new(creds);
        let session = SessionStore::new(Arc::new(auth), Arc::clone(&creds) as Arc<dyn CredentialStore>);
        let observer = Arc::new(RecordingObserver::default());
        session.subscribe(Arc::clone(&observer) as Arc<dyn SessionObserver>);
        (session, creds, observer)
    }

    #[test]
    fn test_restore_valid_credential() {
        let token = provider_token();
        let (session, creds, observer) =
            store_with(FakeAuth::issuing("unused"), MemoryStore::with_token(token.clone()));

        let identity = session.restore().unwrap();
        assert_eq!(identity.subject(), "p@x.com");
        assert_eq!(session.credential().as_deref(), Some(token.as_str()));
        assert_eq!(creds.load().unwrap().as_deref(), Some(token.as_str()));

        let changes = observer.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].became_present());
    }

    #[test]
    fn test_restore_expired_credential_is_discarded() {
        let expired = make_token(
            "p@x.com",
            "ROLE_PROVIDER",
            serde_json::json!("u1"),
            Utc::now().timestamp() - 10,
        );
        let (session, creds, observer) =
            store_with(FakeAuth::issuing("unused"), MemoryStore::with_token(expired));

        assert!(session.restore().is_none());
        assert!(session.current().is_none());
        assert_eq!(creds.load().unwrap(), None);

        // The outcome is still published.
        let changes = observer.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].current.is_none());
    }

    #[test]
    fn test_restore_malformed_credential_is_discarded() {
        let (session, creds, _observer) =
            store_with(FakeAuth::issuing("unused"), MemoryStore::with_token("garbage"));

        assert!(session.restore().is_none());
        assert_eq!(creds.load().unwrap(), None);
    }

    #[test]
    fn test_restore_without_credential() {
        let (session, _creds, observer) = store_with(FakeAuth::issuing("unused"), MemoryStore::new());
        assert!(session.restore().is_none());
        assert_eq!(observer.changes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_login_sets_identity_and_persists() {
        let token = provider_token();
        let (session, creds, observer) =
            store_with(FakeAuth::issuing(token.clone()), MemoryStore::with_token("old.cred.x"));

        let identity = session.login("p@x.com", "secret").await.unwrap();

        assert_eq!(identity.subject(), "p@x.com");
        assert_eq!(identity.role(), Role::Provider);
        assert_eq!(identity.user_id(), "u1");
        assert_eq!(session.current(), Some(identity));
        assert_eq!(creds.load().unwrap().as_deref(), Some(token.as_str()));

        let changes = observer.changes.lock().unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].became_present());
        assert_eq!(changes[0].credential.as_deref(), Some(token.as_str()));
    }

    #[tokio::test]
    async fn test_login_failure_leaves_state_unchanged() {
        let auth = FakeAuth::failing(ApiError::Status {
            status: 401,
            detail: "Bad credentials".to_string(),
        });
        let (session, creds, observer) = store_with(auth, MemoryStore::new());

        let err = session.login("p@x.com", "wrong").await.unwrap_err();

        assert_eq!(err, SessionError::AuthenticationFailed("Bad credentials".to_string()));
        assert!(session.current().is_none());
        assert_eq!(creds.load().unwrap(), None);
        assert!(observer.changes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_login_with_undecodable_token_fails() {
        let (session, creds, _observer) =
            store_with(FakeAuth::issuing("not-a-token"), MemoryStore::new());

        let err = session.login("p@x.com", "secret").await.unwrap_err();
        assert!(matches!(err, SessionError::MalformedCredential(_)));
        assert_eq!(creds.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_logout_clears_and_cancels_epoch() {
        let (session, creds, observer) =
            store_with(FakeAuth::issuing(provider_token()), MemoryStore::new());
        session.login("p@x.com", "secret").await.unwrap();

        let login_token = observer.changes.lock().unwrap()[0].cancel.clone();
        assert!(!login_token.is_cancelled());

        session.logout().unwrap();

        assert!(login_token.is_cancelled());
        assert!(session.current().is_none());
        assert_eq!(creds.load().unwrap(), None);

        let changes = observer.changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes[1].became_absent());
        assert_eq!(changes[1].epoch, changes[0].epoch + 1);
    }

    #[tokio::test]
    async fn test_relogin_replaces_identity() {
        let (session, _creds, observer) =
            store_with(FakeAuth::issuing(provider_token()), MemoryStore::new());
        session.login("p@x.com", "secret").await.unwrap();
        session.login("p@x.com", "secret").await.unwrap();

        let changes = observer.changes.lock().unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes[1].replaced());
        assert!(changes[0].cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_register_rejects_admin_locally() {
        let auth = Arc::new(FakeAuth::issuing("unused"));
        let session = SessionStore::new(Arc::clone(&auth) as Arc<dyn AuthApi>, Arc::new(MemoryStore::new()));
        let profile = RegisterProfile {
            name: "Root".to_string(),
            email: "root@x.com".to_string(),
            password: "pw".to_string(),
            role: Role::Admin,
        };

        assert!(matches!(
            session.register(&profile).await,
            Err(SessionError::InvalidProfile(_))
        ));
        assert!(auth.register_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_does_not_change_identity() {
        let (session, _creds, observer) = store_with(FakeAuth::issuing("unused"), MemoryStore::new());
        let profile = RegisterProfile {
            name: "Cat".to_string(),
            email: "c@x.com".to_string(),
            password: "pw".to_string(),
            role: Role::Customer,
        };

        let response = session.register(&profile).await.unwrap();
        assert!(response.message.is_some());
        assert!(session.current().is_none());
        assert!(observer.changes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_expire_if_due() {
        let token = make_token("c@x.com", "ROLE_CUSTOMER", serde_json::json!(9), future_exp());
        let (session, creds, _observer) =
            store_with(FakeAuth::issuing("unused"), MemoryStore::with_token(token));
        let identity = session.restore().unwrap();

        assert!(!session.expire_if_due(Utc::now()));
        assert!(session.is_authenticated());

        assert!(session.expire_if_due(identity.expires_at()));
        assert!(!session.is_authenticated());
        assert_eq!(creds.load().unwrap(), None);
    }

    #[test]
    fn test_has_any_role_requires_identity() {
        let (session, _creds, _observer) = store_with(FakeAuth::issuing("unused"), MemoryStore::new());
        assert!(!session.has_any_role(&[]));

        let (session, _creds, _observer) =
            store_with(FakeAuth::issuing("unused"), MemoryStore::with_token(provider_token()));
        session.restore();
        assert!(session.has_any_role(&[Role::Provider]));
        assert!(!session.has_any_role(&[Role::Admin]));
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let (session, _creds, observer) =
            store_with(FakeAuth::issuing("unused"), MemoryStore::with_token(provider_token()));
        let extra = Arc::new(RecordingObserver::default());
        let id = session.subscribe(Arc::clone(&extra) as Arc<dyn SessionObserver>);

        session.restore();
        session.unsubscribe(id);
        session.logout().unwrap();

        assert_eq!(extra.changes.lock().unwrap().len(), 1);
        assert_eq!(observer.changes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expiry_watch_ends_session() {
        let token = make_token(
            "c@x.com",
            "ROLE_CUSTOMER",
            serde_json::json!(9),
            Utc::now().timestamp() + 1,
        );
        let (session, creds, observer) =
            store_with(FakeAuth::issuing("unused"), MemoryStore::with_token(token));
        let session = Arc::new(session);
        session.subscribe(Arc::new(ExpiryWatch::new(&session)));

        assert!(session.restore().is_some());
        for _ in 0..300 {
            if !session.is_authenticated() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(!session.is_authenticated());
        assert_eq!(creds.load().unwrap(), None);
        assert!(observer.changes.lock().unwrap()[1].became_absent());
    }

    #[tokio::test]
    async fn test_expiry_watch_cancelled_by_logout() {
        let (session, _creds, observer) =
            store_with(FakeAuth::issuing("unused"), MemoryStore::with_token(provider_token()));
        let session = Arc::new(session);
        session.subscribe(Arc::new(ExpiryWatch::new(&session)));

        session.restore();
        session.logout().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(observer.changes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_closure_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let session = SessionStore::new(
            Arc::new(FakeAuth::issuing("unused")),
            Arc::new(MemoryStore::with_token(provider_token())),
        );
        session.subscribe(Arc::new(move |change: &IdentityChange| {
            sink.lock().unwrap().push(change.epoch);
        }));

        session.restore();
        session.logout().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_logout_without_session_publishes_nothing() {
        let (session, creds, observer) = store_with(FakeAuth::issuing("unused"), MemoryStore::new());
        session.restore();
        let epoch = session.epoch();
        let token = observer.changes.lock().unwrap()[0].cancel.clone();

        session.logout().unwrap();

        assert_eq!(session.epoch(), epoch);
        assert!(!token.is_cancelled());
        assert_eq!(observer.changes.lock().unwrap().len(), 1);
        assert_eq!(creds.load().unwrap(), None);
    }

    /// Store whose `save` writes the token, then parks until released.
    #[derive(Debug)]
    struct ParkedSaveStore {
        inner: MemoryStore,
        entered: Mutex<std::sync::mpsc::Sender<()>>,
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl CredentialStore for ParkedSaveStore {
        fn load(&self) -> anyhow::Result<Option<String>> {
            self.inner.load()
        }

        fn save(&self, token: &str) -> anyhow::Result<()> {
            self.inner.save(token)?;
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            Ok(())
        }

        fn clear(&self) -> anyhow::Result<()> {
            self.inner.clear()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_logout_during_login_save_keeps_store_and_identity_in_step() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let creds = Arc::new(ParkedSaveStore {
            inner: MemoryStore::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let session = Arc::new(SessionStore::new(
            Arc::new(FakeAuth::issuing(provider_token())),
            Arc::clone(&creds) as Arc<dyn CredentialStore>,
        ));

        let login = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.login("p@x.com", "secret").await }
        });
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        // Logout arrives while the credential is being written.
        let logout = std::thread::spawn({
            let session = Arc::clone(&session);
            move || session.logout()
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        release_tx.send(()).unwrap();

        login.await.unwrap().unwrap();
        logout.join().unwrap().unwrap();

        assert!(session.current().is_none());
        assert_eq!(creds.load().unwrap(), None);
    }
}
