//! Notification router: display, then acknowledge.
//!
//! Every delivered notification is shown as a persistent alert and then
//! acknowledged with `markRead`. Acknowledgments run on a single background
//! worker fed by an unbounded channel, so they reach the server in delivery
//! order without blocking the caller. An acknowledgment failure is logged
//! and dropped; the alert stays on screen.

use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, oneshot};

use super::{DeliveryEvent, Notification, NotificationId, Source};
use crate::server::NotificationApi;
use crate::session::SessionStore;

/// Alert handed to the display collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Notification being shown and the path that delivered it.
    pub event: DeliveryEvent,
    /// Alert stays until the user dismisses it. Always `true` for notifications.
    pub persistent: bool,
}

/// Shows alerts to the user.
///
/// Called on the delivering task; implementations should return quickly.
pub trait AlertDisplay: Send + Sync {
    /// Show one alert.
    fn show(&self, alert: &Alert);
}

enum AckCommand {
    MarkRead {
        id: NotificationId,
        credential: Option<String>,
    },
    Flush(oneshot::Sender<()>),
}

/// Routes notifications from fetch and push to the display and the server.
///
/// No dedup: the same id delivered twice is displayed and acknowledged twice.
pub struct NotificationRouter {
    display: Arc<dyn AlertDisplay>,
    session: Weak<SessionStore>,
    ack_tx: mpsc::UnboundedSender<AckCommand>,
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter").finish_non_exhaustive()
    }
}

impl NotificationRouter {
    /// Create a router and spawn its acknowledgment worker.
    ///
    /// Must be called within a Tokio runtime. The worker exits once the
    /// router is dropped and its queue is drained. The session is only
    /// consulted for the credential to acknowledge with.
    pub fn new(
        display: Arc<dyn AlertDisplay>,
        api: Arc<dyn NotificationApi>,
        session: &Arc<SessionStore>,
    ) -> Self {
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_ack_worker(api, ack_rx));
        Self {
            display,
            session: Arc::downgrade(session),
            ack_tx,
        }
    }

    /// Display `notification`, then queue its acknowledgment.
    ///
    /// The acknowledgment carries whatever credential is current at the time
    /// of delivery.
    pub fn deliver(&self, notification: Notification, source: Source) {
        log::info!(
            "[Router] Delivering notification {} ({})",
            notification.id,
            source
        );

        let id = notification.id;
        self.display.show(&Alert {
            event: DeliveryEvent {
                notification,
                source,
            },
            persistent: true,
        });

        let command = AckCommand::MarkRead {
            id,
            credential: self.session.upgrade().and_then(|session| session.credential()),
        };
        if self.ack_tx.send(command).is_err() {
            log::warn!("[Router] Ack worker gone, notification {} not acknowledged", id);
        }
    }

    /// Wait until every acknowledgment queued so far has been attempted.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.ack_tx.send(AckCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_ack_worker(
    api: Arc<dyn NotificationApi>,
    mut ack_rx: mpsc::UnboundedReceiver<AckCommand>,
) {
    while let Some(command) = ack_rx.recv().await {
        match command {
            AckCommand::MarkRead { id, credential } => {
                if let Err(e) = api.mark_read(id, credential.as_deref()).await {
                    log::warn!("[Router] Failed to mark notification {} read: {}", id, e);
                }
            }
            AckCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    log::debug!("[Router] Ack worker stopped");
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Display that records every alert.
    #[derive(Debug, Default)]
    pub struct RecordingDisplay {
        pub alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingDisplay {
        pub fn shown(&self) -> Vec<(NotificationId, Source)> {
            self.alerts
                .lock()
                .unwrap()
                .iter()
                .map(|a| (a.event.notification.id, a.event.source))
                .collect()
        }
    }

    impl AlertDisplay for RecordingDisplay {
        fn show(&self, alert: &Alert) {
            self.alerts.lock().unwrap().push(alert.clone());
        }
    }
}
