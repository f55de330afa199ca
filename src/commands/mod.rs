//! CLI subcommand implementations for booking-notify.
//!
//! Commands are organized into submodules by concern:
//!
//! - [`account`] - login, register, logout, whoami
//! - [`listen`] - print alerts until interrupted
//!
//! # Usage
//!
//! Commands are invoked from the main CLI dispatcher:
//!
//! ```ignore
//! use booking_notify::commands;
//!
//! commands::account::login(&config, "p@x.com", None).await?;
//! commands::listen::run(config).await?;
//! ```

pub mod account;
pub mod listen;
