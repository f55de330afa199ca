//! booking-notify - session-aware real-time notifications for the booking
//! platform.
//!
//! Keeps the live push channel bound to the logged-in identity, reconciles
//! the notifications that piled up while offline, and routes every
//! notification to a display and back to the server as read.
//!
//! # Architecture
//!
//! One [`SessionStore`] owns the current identity; everything else observes
//! it:
//!
//! - **Session** - credential lifecycle (restore, login, register, logout)
//! - **Connection** - one STOMP-over-WebSocket connection per identity
//! - **Reconciliation** - one snapshot fetch per identity
//! - **Router** - persistent alert, then fire-and-forget `markRead`
//!
//! [`NotificationClient`] wires them together.
//!
//! # Modules
//!
//! - [`session`] - Session store and identity observers
//! - [`connection`] - Push connection manager
//! - [`notifications`] - Notification model, router, reconciliation fetch
//! - [`channel`] - Push transport and STOMP codec
//! - [`server`] - HTTP API client
//! - [`credential`] - Credential decoding and role checks
//! - [`keyring`] - Credential persistence
//! - [`config`] - Configuration loading/saving
//! - [`commands`] - CLI subcommands

pub mod channel;
pub mod client;
pub mod commands;
pub mod connection;
pub mod server;
pub mod session;
pub mod ws;

pub mod config;
pub mod constants;
pub mod credential;
pub mod env;
pub mod keyring;
pub mod notifications;

// Re-export commonly used types
pub use channel::ConnectionState;
pub use client::{NotificationClient, NotificationClientBuilder};
pub use config::Config;
pub use credential::{Identity, Role};
pub use notifications::{Alert, AlertDisplay, DeliveryEvent, Notification, Source};
pub use session::{IdentityChange, SessionError, SessionObserver, SessionStore};
