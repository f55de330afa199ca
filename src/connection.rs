//! Push connection manager.
//!
//! Keeps exactly one push connection per identity. It observes the
//! [`SessionStore`](crate::session::SessionStore):
//!
//! ```text
//!              identity present               CONNECTED
//! Disconnected ───────────────► Connecting ───────────────► Connected
//!      ▲                            │                           │
//!      └────── logout / error ──────┴───────────────────────────┘
//!
//!  any state ── shutdown() ──► Closed
//! ```
//!
//! Each attempt runs on its own task bound to the identity epoch that
//! started it. The attempt opens the transport with the credential in the
//! URL, sends `CONNECT`, waits for `CONNECTED`, sends one `SUBSCRIBE` to the
//! per-user destination, then forwards every `MESSAGE` to the router.
//!
//! # Teardown
//!
//! Logout tears the connection down before [`SessionObserver::on_identity_change`]
//! returns: the delivery gate is closed and the state is `Disconnected`.
//! Every delivery and state change made by an attempt goes through the same
//! gate, so a handshake that completes after teardown is discarded and no
//! push reaches the router afterwards. The socket itself is closed in the
//! background (`UNSUBSCRIBE`, `DISCONNECT`, close).
//!
//! There is no reconnect. After a transport error the manager stays
//! `Disconnected` until the next identity arrives.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::stomp::{self, Command, Frame};
use crate::channel::{ConnectionState, FrameSink, FrameSource, PushTransport, TransportError};
use crate::constants::{SUBSCRIPTION_ID, TEARDOWN_GRACE};
use crate::notifications::{Notification, NotificationRouter, Source};
use crate::session::{IdentityChange, SessionObserver};
use crate::Config;

/// State shared between the manager and its attempt task.
struct Shared {
    router: Arc<NotificationRouter>,
    state_tx: watch::Sender<ConnectionState>,
    /// Epoch allowed to deliver and change state; `None` once torn down.
    live: Mutex<Option<u64>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            log::debug!("[Push] {} -> {}", previous, state);
        }
    }

    /// Returns `false` when `epoch` was torn down while handshaking.
    fn mark_connected(&self, epoch: u64) -> bool {
        let live = self.live.lock().expect("Push gate mutex poisoned");
        if *live != Some(epoch) {
            return false;
        }
        self.set_state(ConnectionState::Connected);
        true
    }

    fn mark_failed(&self, epoch: u64, err: &TransportError) {
        let mut live = self.live.lock().expect("Push gate mutex poisoned");
        if *live == Some(epoch) {
            *live = None;
            self.set_state(ConnectionState::Disconnected);
            log::warn!("[Push] {}; live updates off until next login", err);
        } else {
            log::debug!("[Push] Epoch {} failed after teardown: {}", epoch, err);
        }
    }

    /// Returns `false` when `epoch` has been torn down.
    fn deliver(&self, epoch: u64, notification: Notification) -> bool {
        let live = self.live.lock().expect("Push gate mutex poisoned");
        if *live != Some(epoch) {
            log::debug!(
                "[Push] Dropping notification {} for ended epoch {}",
                notification.id,
                epoch
            );
            return false;
        }
        self.router.deliver(notification, Source::Push);
        true
    }
}

struct ActiveAttempt {
    epoch: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Attempts {
    closed: bool,
    active: Option<ActiveAttempt>,
}

/// Owns the push connection for the current identity.
pub struct ConnectionManager {
    config: Config,
    transport: Arc<dyn PushTransport>,
    shared: Arc<Shared>,
    attempts: Mutex<Attempts>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager in `Disconnected`. Register it with the session
    /// store to start connecting.
    pub fn new(
        config: Config,
        transport: Arc<dyn PushTransport>,
        router: Arc<NotificationRouter>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            transport,
            shared: Arc::new(Shared {
                router,
                state_tx,
                live: Mutex::new(None),
            }),
            attempts: Mutex::new(Attempts::default()),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that sees every later state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Tear down for good and wait for the socket to close.
    ///
    /// The state is `Closed` and no push is delivered once this returns.
    /// Identity changes after shutdown are ignored.
    pub async fn shutdown(&self) {
        let active = {
            let mut attempts = self.attempts.lock().expect("Push attempts mutex poisoned");
            attempts.closed = true;
            attempts.active.take()
        };

        {
            let mut live = self.shared.live.lock().expect("Push gate mutex poisoned");
            *live = None;
            self.shared.set_state(ConnectionState::Closed);
        }

        if let Some(active) = active {
            active.cancel.cancel();
            let mut task = active.task;
            if tokio::time::timeout(TEARDOWN_GRACE, &mut task).await.is_err() {
                log::warn!("[Push] Connection task did not stop in time, aborting");
                task.abort();
            }
        }
        log::info!("[Push] Closed");
    }

    /// Close the gate for the active attempt and cancel it.
    fn teardown(&self, active: ActiveAttempt) {
        {
            let mut live = self.shared.live.lock().expect("Push gate mutex poisoned");
            *live = None;
            self.shared.set_state(ConnectionState::Disconnected);
        }
        active.cancel.cancel();
        log::info!("[Push] Disconnected (epoch {})", active.epoch);
    }

    fn start(&self, change: &IdentityChange, credential: &str) -> Option<ActiveAttempt> {
        let url = match self.config.push_url(credential) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("[Push] Cannot build push URL: {e:#}");
                return None;
            }
        };

        {
            let mut live = self.shared.live.lock().expect("Push gate mutex poisoned");
            *live = Some(change.epoch);
            self.shared.set_state(ConnectionState::Connecting);
        }

        let cancel = change.cancel.child_token();
        let attempt = Attempt {
            epoch: change.epoch,
            url,
            destination: self.config.destination.clone(),
            transport: Arc::clone(&self.transport),
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
        };

        Some(ActiveAttempt {
            epoch: change.epoch,
            cancel,
            task: tokio::spawn(attempt.run()),
        })
    }
}

impl SessionObserver for ConnectionManager {
    fn on_identity_change(&self, change: &IdentityChange) {
        let mut attempts = self.attempts.lock().expect("Push attempts mutex poisoned");
        if attempts.closed {
            return;
        }

        if let Some(previous) = attempts.active.take() {
            self.teardown(previous);
        }

        if change.current.is_none() {
            return;
        }
        if let Some(credential) = change.credential.as_deref() {
            attempts.active = self.start(change, credential);
        }
    }
}

/// One connection attempt, bound to an identity epoch.
struct Attempt {
    epoch: u64,
    url: String,
    destination: String,
    transport: Arc<dyn PushTransport>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Attempt {
    async fn run(self) {
        let handshake = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                log::debug!("[Push] Epoch {} cancelled during handshake", self.epoch);
                return;
            }
            result = handshake(self.transport.as_ref(), &self.url) => result,
        };

        let (mut sink, mut source) = match handshake {
            Ok(halves) => halves,
            Err(e) => {
                self.shared.mark_failed(self.epoch, &e);
                return;
            }
        };

        if !self.shared.mark_connected(self.epoch) {
            log::debug!("[Push] Discarding handshake for ended epoch {}", self.epoch);
            sink.close().await;
            return;
        }
        log::info!("[Push] Connected (epoch {})", self.epoch);

        let subscribe = Frame::subscribe(SUBSCRIPTION_ID, &self.destination);
        if let Err(e) = sink.send(subscribe.encode()).await {
            self.shared.mark_failed(self.epoch, &e);
            sink.close().await;
            return;
        }
        log::info!("[Push] Subscribed to {}", self.destination);

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Ok(()),
            result = self.read_loop(source.as_mut()) => result,
        };

        match outcome {
            Ok(()) => farewell(sink.as_mut()).await,
            Err(e) => {
                self.shared.mark_failed(self.epoch, &e);
                sink.close().await;
            }
        }
    }

    /// Forward `MESSAGE` frames until the connection fails or the epoch ends.
    async fn read_loop(&self, source: &mut dyn FrameSource) -> Result<(), TransportError> {
        loop {
            let text = match source.recv().await {
                Some(result) => result?,
                None => return Err(TransportError::Closed),
            };

            let frames = match stomp::decode_all(&text) {
                Ok(frames) => frames,
                Err(e) => {
                    log::warn!("[Push] Ignoring undecodable frame: {}", e);
                    continue;
                }
            };

            for frame in frames {
                match frame.command {
                    Command::Message => match Notification::from_json(&frame.body) {
                        Ok(notification) => {
                            if !self.shared.deliver(self.epoch, notification) {
                                return Ok(());
                            }
                        }
                        Err(e) => log::warn!("[Push] Ignoring malformed notification: {}", e),
                    },
                    Command::Error => return Err(TransportError::Rejected(frame.error_detail())),
                    other => log::trace!("[Push] Ignoring {} frame", other),
                }
            }
        }
    }
}

/// Open the transport and complete the STOMP handshake.
async fn handshake(
    transport: &dyn PushTransport,
    url: &str,
) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>), TransportError> {
    let (mut sink, mut source) = transport.open(url).await?;

    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string());
    sink.send(Frame::connect(&host).encode()).await?;

    loop {
        let text = match source.recv().await {
            Some(result) => result?,
            None => {
                return Err(TransportError::Protocol(
                    "connection closed before CONNECTED".to_string(),
                ))
            }
        };
        for frame in stomp::decode_all(&text)? {
            match frame.command {
                Command::Connected => {
                    log::debug!(
                        "[Push] STOMP session established (version {})",
                        frame.get("version").unwrap_or("1.0")
                    );
                    return Ok((sink, source));
                }
                Command::Error => return Err(TransportError::Rejected(frame.error_detail())),
                other => log::trace!("[Push] Ignoring {} frame during handshake", other),
            }
        }
    }
}

/// Best-effort `UNSUBSCRIBE`, `DISCONNECT`, close.
async fn farewell(sink: &mut dyn FrameSink) {
    let goodbye = async {
        if sink.send(Frame::unsubscribe(SUBSCRIPTION_ID).encode()).await.is_ok() {
            let _ = sink.send(Frame::disconnect().encode()).await;
        }
        sink.close().await;
    };
    if tokio::time::timeout(TEARDOWN_GRACE, goodbye).await.is_err() {
        log::debug!("[Push] Teardown timed out");
    }
}
