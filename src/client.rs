//! Composition root.
//!
//! [`NotificationClient`] builds one [`SessionStore`] and wires its
//! dependents to it:
//!
//! ```text
//!                 ┌──────────────► ConnectionManager ──┐ push
//! SessionStore ───┼──────────────► ReconciliationFetcher ─┤ fetch
//!   (observers)   └──────────────► ExpiryWatch         ▼
//!                                          NotificationRouter ──► AlertDisplay
//!                                                    └─ markRead ──► server
//! ```
//!
//! Observers are registered before the persisted session is restored, so a
//! restored identity starts its connection and its fetch like a login does.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use crate::channel::{ConnectionState, PushTransport, WsTransport};
use crate::connection::ConnectionManager;
use crate::credential::Identity;
use crate::keyring::{self, CredentialStore};
use crate::notifications::{AlertDisplay, NotificationRouter, ReconciliationFetcher};
use crate::server::{ApiClient, AuthApi, NotificationApi, RegisterProfile, RegisterResponse};
use crate::session::{ExpiryWatch, SessionError, SessionObserver, SessionStore};
use crate::Config;

/// Builder for [`NotificationClient`].
///
/// Collaborators that are not set explicitly default to the real ones:
/// [`ApiClient`], [`keyring::default_store`], and [`WsTransport`].
pub struct NotificationClientBuilder {
    config: Config,
    display: Arc<dyn AlertDisplay>,
    auth: Option<Arc<dyn AuthApi>>,
    notifications: Option<Arc<dyn NotificationApi>>,
    store: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn PushTransport>>,
}

impl std::fmt::Debug for NotificationClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationClientBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NotificationClientBuilder {
    /// Use this auth collaborator.
    pub fn auth_api(mut self, auth: Arc<dyn AuthApi>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Use this notifications collaborator.
    pub fn notification_api(mut self, api: Arc<dyn NotificationApi>) -> Self {
        self.notifications = Some(api);
        self
    }

    /// Use this credential store.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this push transport.
    pub fn transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Wire everything and restore the persisted session.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Result<NotificationClient> {
        let (auth, notifications): (Arc<dyn AuthApi>, Arc<dyn NotificationApi>) =
            match (self.auth, self.notifications) {
                (Some(auth), Some(notifications)) => (auth, notifications),
                (auth, notifications) => {
                    let api = Arc::new(ApiClient::new(&self.config)?);
                    (
                        auth.unwrap_or_else(|| Arc::clone(&api) as Arc<dyn AuthApi>),
                        notifications.unwrap_or_else(|| api as Arc<dyn NotificationApi>),
                    )
                }
            };
        let store = match self.store {
            Some(store) => store,
            None => keyring::default_store()?,
        };
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WsTransport::new()));

        let session = Arc::new(SessionStore::new(auth, store));
        let router = Arc::new(NotificationRouter::new(
            self.display,
            Arc::clone(&notifications),
            &session,
        ));
        let connection = Arc::new(ConnectionManager::new(
            self.config.clone(),
            transport,
            Arc::clone(&router),
        ));
        let fetcher = Arc::new(ReconciliationFetcher::new(
            notifications,
            Arc::clone(&router),
            self.config.suppress_stale_fetch,
        ));

        session.subscribe(Arc::clone(&connection) as Arc<dyn SessionObserver>);
        session.subscribe(fetcher as Arc<dyn SessionObserver>);
        session.subscribe(Arc::new(ExpiryWatch::new(&session)));
        session.restore();

        Ok(NotificationClient {
            session,
            router,
            connection,
        })
    }
}

/// The notification subsystem, ready to use.
#[derive(Debug)]
pub struct NotificationClient {
    session: Arc<SessionStore>,
    router: Arc<NotificationRouter>,
    connection: Arc<ConnectionManager>,
}

impl NotificationClient {
    /// Start building a client for `config` that shows alerts on `display`.
    pub fn builder(config: Config, display: Arc<dyn AlertDisplay>) -> NotificationClientBuilder {
        NotificationClientBuilder {
            config,
            display,
            auth: None,
            notifications: None,
            store: None,
            transport: None,
        }
    }

    /// The shared session store, for registering more observers.
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Current identity.
    pub fn identity(&self) -> Option<Identity> {
        self.session.current()
    }

    /// Log in. See [`SessionStore::login`].
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, SessionError> {
        self.session.login(email, password).await
    }

    /// Create an account. See [`SessionStore::register`].
    pub async fn register(&self, profile: &RegisterProfile) -> Result<RegisterResponse, SessionError> {
        self.session.register(profile).await
    }

    /// Log out. The push connection is down when this returns.
    pub fn logout(&self) -> Result<(), SessionError> {
        self.session.logout()
    }

    /// Push connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receiver for push connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// Close the push connection for good and wait for queued
    /// acknowledgments to be attempted.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
        if tokio::time::timeout(crate::constants::TEARDOWN_GRACE, self.router.flush())
            .await
            .is_err()
        {
            log::warn!("[Router] Pending acknowledgments not sent before shutdown");
        }
    }
}
