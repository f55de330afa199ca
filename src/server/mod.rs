//! HTTP collaborator for the booking server.
//!
//! The rest of the crate talks to the server through two traits so that
//! session and delivery logic can be exercised without a network:
//!
//! - [`AuthApi`] - login and registration (unauthenticated endpoints)
//! - [`NotificationApi`] - pending list and acknowledgment (bearer auth)
//!
//! [`ApiClient`] implements both over `reqwest`.
//!
//! # Modules
//!
//! - [`client`] - HTTP client
//! - [`types`] - Request/response bodies

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::notifications::{Notification, NotificationId};

pub use client::ApiClient;
pub use types::{LoginResponse, RegisterProfile, RegisterResponse};

/// Errors returned by the HTTP collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Server answered with a non-success status.
    Status {
        /// HTTP status code.
        status: u16,
        /// Detail extracted from the response body, or the status text.
        detail: String,
    },
    /// Request never completed (connect, timeout, TLS).
    Transport(String),
    /// Response body did not match the expected shape.
    Decode(String),
}

impl ApiError {
    /// Text suitable for showing to the user.
    pub fn detail(&self) -> &str {
        match self {
            Self::Status { detail, .. } => detail,
            Self::Transport(msg) | Self::Decode(msg) => msg,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status { status, detail } => write!(f, "Server returned {status}: {detail}"),
            Self::Transport(msg) => write!(f, "Request failed: {msg}"),
            Self::Decode(msg) => write!(f, "Invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange email and password for a credential.
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError>;

    /// Create an account. Does not log in.
    async fn register(&self, profile: &RegisterProfile) -> Result<RegisterResponse, ApiError>;
}

/// Notification endpoints, authenticated with the caller's credential.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Notifications still unread for the credential's identity, in server order.
    async fn list_pending(&self, credential: &str) -> Result<Vec<Notification>, ApiError>;

    /// Mark one notification read. Idempotent on the server.
    ///
    /// Sent without an `Authorization` header when `credential` is `None`.
    async fn mark_read(&self, id: NotificationId, credential: Option<&str>)
        -> Result<(), ApiError>;
}
