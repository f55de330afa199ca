//! Reconciliation fetch.
//!
//! When an identity becomes present, the notifications that piled up while
//! the client was offline are fetched once and delivered in server order with
//! [`Source::Fetch`]. A failed fetch counts as an empty list and is not
//! retried. The fetch runs on its own task so it never holds up the push
//! connection.

use std::sync::Arc;

use super::{Notification, NotificationRouter, Source};
use crate::server::NotificationApi;
use crate::session::{IdentityChange, SessionObserver};

/// Fetches pending notifications once per identity.
pub struct ReconciliationFetcher {
    api: Arc<dyn NotificationApi>,
    router: Arc<NotificationRouter>,
    suppress_stale: bool,
}

impl std::fmt::Debug for ReconciliationFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationFetcher")
            .field("suppress_stale", &self.suppress_stale)
            .finish_non_exhaustive()
    }
}

impl ReconciliationFetcher {
    /// Create a fetcher.
    ///
    /// With `suppress_stale`, results that arrive after their identity epoch
    /// has ended are dropped. Without it they are still delivered.
    pub fn new(
        api: Arc<dyn NotificationApi>,
        router: Arc<NotificationRouter>,
        suppress_stale: bool,
    ) -> Self {
        Self {
            api,
            router,
            suppress_stale,
        }
    }

    /// Notifications pending for `credential`, in server order.
    ///
    /// Failures are logged and yield an empty list.
    pub async fn fetch_pending(&self, credential: &str) -> Vec<Notification> {
        fetch_pending(self.api.as_ref(), credential).await
    }

    fn spawn_fetch(&self, change: &IdentityChange, credential: String) {
        let api = Arc::clone(&self.api);
        let router = Arc::clone(&self.router);
        let cancel = change.cancel.clone();
        let epoch = change.epoch;
        let suppress_stale = self.suppress_stale;

        tokio::spawn(async move {
            let pending = fetch_pending(api.as_ref(), &credential).await;
            log::info!(
                "[Fetch] {} pending notification(s) for epoch {}",
                pending.len(),
                epoch
            );

            for notification in pending {
                if suppress_stale && cancel.is_cancelled() {
                    log::info!("[Fetch] Epoch {} ended, dropping remaining results", epoch);
                    return;
                }
                router.deliver(notification, Source::Fetch);
            }
        });
    }
}

async fn fetch_pending(api: &dyn NotificationApi, credential: &str) -> Vec<Notification> {
    match api.list_pending(credential).await {
        Ok(pending) => pending,
        Err(e) => {
            log::warn!("[Fetch] Failed to fetch pending notifications: {}", e);
            Vec::new()
        }
    }
}

impl SessionObserver for ReconciliationFetcher {
    fn on_identity_change(&self, change: &IdentityChange) {
        // Re-login counts as a fresh identity.
        if !(change.became_present() || change.replaced()) {
            return;
        }
        let Some(credential) = change.credential.clone() else {
            return;
        };
        self.spawn_fetch(change, credential);
    }
}
