//! Notification model and delivery.
//!
//! Notifications reach the client from two sources:
//!
//! - **Fetch**: the one-shot reconciliation snapshot taken when an identity
//!   becomes present ([`reconcile`]).
//! - **Push**: the live channel owned by [`crate::connection`].
//!
//! Both hand their notifications to the [`router::NotificationRouter`],
//! which displays each one and acknowledges it. Delivery is at-least-once:
//! the same id arriving from both sources is delivered twice.
//!
//! # Modules
//!
//! - [`router`] - display + acknowledgment
//! - [`reconcile`] - reconciliation fetch

pub mod reconcile;
pub mod router;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub use reconcile::ReconciliationFetcher;
pub use router::{Alert, AlertDisplay, NotificationRouter};

/// Server-assigned notification id.
pub type NotificationId = i64;

/// A notification addressed to the current identity.
///
/// The `read` flag is owned by the server; the client never flips it
/// locally, it only fires the acknowledgment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique id.
    pub id: NotificationId,
    /// Human-readable text.
    pub message: String,
    /// Creation time as reported by the server (local date-time, no zone).
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
    /// Server-side read flag at the time the notification was sent.
    #[serde(default, alias = "isRead")]
    pub read: bool,
}

impl Notification {
    /// Parse a push payload.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Where a delivered notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Reconciliation snapshot.
    Fetch,
    /// Live push channel.
    Push,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// A notification paired with its source, as carried by an [`Alert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    /// The delivered notification.
    pub notification: Notification,
    /// Which path delivered it.
    pub source: Source,
}
