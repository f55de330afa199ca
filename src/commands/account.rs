//! Account commands: login, register, logout, whoami.
//!
//! These run against a bare [`SessionStore`] with no push connection or
//! reconciliation attached, so logging in from the CLI never consumes
//! pending notifications. `listen` does that.
//!
//! # Examples
//!
//! ```bash
//! booking-notify register --name Pat --email p@x.com --role provider
//! booking-notify login --email p@x.com
//! booking-notify whoami
//! booking-notify logout
//! ```

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::credential::Role;
use crate::keyring;
use crate::server::{ApiClient, RegisterProfile};
use crate::session::SessionStore;
use crate::Config;

/// Environment variable consulted when `--password` is not given.
pub const PASSWORD_ENV: &str = "BOOKING_PASSWORD";

fn open_session(config: &Config) -> Result<SessionStore> {
    let api = Arc::new(ApiClient::new(config)?);
    let store = keyring::default_store()?;
    Ok(SessionStore::new(api, store))
}

/// Pick the password from the flag, then the environment.
fn resolve_password(flag: Option<String>, env: Option<String>) -> Option<String> {
    flag.filter(|p| !p.is_empty())
        .or_else(|| env.filter(|p| !p.is_empty()))
}

/// Password from `--password`, `BOOKING_PASSWORD`, or a stdin prompt.
fn password(flag: Option<String>) -> Result<String> {
    if let Some(password) = resolve_password(flag, std::env::var(PASSWORD_ENV).ok()) {
        return Ok(password);
    }

    if atty::is(atty::Stream::Stdin) {
        eprint!("Password: ");
        io::stderr().flush()?;
    }
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("No password given");
    }
    Ok(password)
}

/// Log in and persist the credential.
///
/// # Errors
///
/// Returns the server's detail when authentication fails.
pub async fn login(config: &Config, email: &str, password_flag: Option<String>) -> Result<()> {
    let password = password(password_flag)?;
    let session = open_session(config)?;
    session.restore();

    let identity = session.login(email, &password).await?;
    println!(
        "Logged in as {} ({}), session valid until {}",
        identity.subject(),
        identity.role(),
        identity.expires_at().format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

/// Create an account. Does not log in.
///
/// # Errors
///
/// Returns an error for `ROLE_ADMIN` or when the server rejects the profile.
pub async fn register(
    config: &Config,
    name: &str,
    email: &str,
    role: Role,
    password_flag: Option<String>,
) -> Result<()> {
    let profile = RegisterProfile {
        name: name.to_string(),
        email: email.to_string(),
        password: password(password_flag)?,
        role,
    };
    let session = open_session(config)?;

    let response = session.register(&profile).await?;
    println!(
        "{}",
        response
            .message
            .unwrap_or_else(|| format!("Registered {email}"))
    );
    println!("Run `booking-notify login --email {email}` to sign in.");
    Ok(())
}

/// Clear the stored credential.
pub fn logout(config: &Config) -> Result<()> {
    let session = open_session(config)?;
    let was = session.restore();
    session.logout()?;
    match was {
        Some(identity) => println!("Logged out {}", identity.subject()),
        None => println!("Not logged in"),
    }
    Ok(())
}

/// Print the stored identity, if it is still valid.
pub fn whoami(config: &Config) -> Result<()> {
    let session = open_session(config)?;
    match session.restore() {
        Some(identity) => {
            println!("Subject:  {}", identity.subject());
            println!("Role:     {}", identity.role());
            println!("User id:  {}", identity.user_id());
            println!(
                "Expires:  {}",
                identity.expires_at().format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => println!("Not logged in"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_password_prefers_flag() {
        assert_eq!(
            resolve_password(Some("flag".to_string()), Some("env".to_string())),
            Some("flag".to_string())
        );
    }

    #[test]
    fn test_resolve_password_falls_back_to_env() {
        assert_eq!(
            resolve_password(None, Some("env".to_string())),
            Some("env".to_string())
        );
        assert_eq!(resolve_password(None, None), None);
    }

    #[test]
    fn test_resolve_password_ignores_empty() {
        assert_eq!(resolve_password(Some(String::new()), None), None);
        assert_eq!(
            resolve_password(Some(String::new()), Some("env".to_string())),
            Some("env".to_string())
        );
    }
}
