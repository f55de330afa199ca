//! `listen`: print notifications as they arrive.
//!
//! Restores the stored session, connects, prints the pending snapshot and
//! then every pushed notification until Ctrl-C or until the session ends.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;

use crate::channel::ConnectionState;
use crate::notifications::{Alert, AlertDisplay};
use crate::{Config, NotificationClient};

/// Prints alerts to stdout. Printed lines stay until the user clears the
/// terminal, so every alert is persistent.
#[derive(Debug, Default)]
pub struct TerminalDisplay;

impl TerminalDisplay {
    /// Create a display.
    pub fn new() -> Self {
        Self
    }
}

/// One line per alert.
fn format_alert(alert: &Alert) -> String {
    let n = &alert.event.notification;
    let source = alert.event.source;
    match n.created_at {
        Some(at) => format!(
            "[{}] #{} {}  ({})",
            source,
            n.id,
            n.message,
            at.format("%Y-%m-%d %H:%M")
        ),
        None => format!("[{}] #{} {}", source, n.id, n.message),
    }
}

impl AlertDisplay for TerminalDisplay {
    fn show(&self, alert: &Alert) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", format_alert(alert));
        let _ = stdout.flush();
    }
}

/// Listen until Ctrl-C, then shut the connection down.
///
/// # Errors
///
/// Returns an error if there is no valid stored session or the client
/// cannot be built.
pub async fn run(config: Config) -> Result<()> {
    let client = NotificationClient::builder(config, Arc::new(TerminalDisplay::new())).build()?;

    let Some(identity) = client.identity() else {
        anyhow::bail!("Not logged in. Run `booking-notify login` first.");
    };
    println!(
        "Listening for notifications as {} ({}). Press Ctrl-C to stop.",
        identity.subject(),
        identity.role()
    );

    let mut state = client.watch_connection();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    log::warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                match current {
                    ConnectionState::Connected => eprintln!("-- live updates on --"),
                    ConnectionState::Disconnected if client.identity().is_none() => {
                        eprintln!("-- session ended, log in again to keep listening --");
                        break;
                    }
                    ConnectionState::Disconnected => {
                        eprintln!("-- live updates off (see log for details) --");
                    }
                    ConnectionState::Connecting | ConnectionState::Closed => {}
                }
            }
        }
    }

    println!("Shutting down...");
    client.shutdown().await;
    Ok(())
}
