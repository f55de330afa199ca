//! Durable storage for the single active credential.
//!
//! # Storage
//!
//! Production: OS keyring entry `booking-notify/credential`.
//! Test mode (`BOOKING_ENV=test`): file at `{config_dir}/credential`.
//!
//! Embedders and tests can also use [`MemoryStore`].
//!
//! # Graceful Degradation
//!
//! The keyring can be locked or refuse access (macOS re-prompts when the
//! binary signature changes). Reads retry briefly and distinguish between:
//! - Keyring locked (user can unlock)
//! - Entry missing (normal when logged out)
//! - Access denied (signature mismatch, may need to log in again)

use anyhow::{Context, Result};
use keyring::Entry;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::constants::{CREDENTIAL_KEY, KEYRING_SERVICE};

/// Number of attempts for keyring reads.
const KEYRING_RETRY_ATTEMPTS: u32 = 2;
/// Delay between read attempts in milliseconds.
const KEYRING_RETRY_DELAY_MS: u64 = 200;

/// Persistence backend for the active credential.
///
/// Exactly one credential is stored at a time; `save` overwrites.
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Read the stored credential, `None` when absent.
    fn load(&self) -> Result<Option<String>>;
    /// Store `token`, replacing any prior credential.
    fn save(&self, token: &str) -> Result<()>;
    /// Remove the stored credential. Removing an absent credential succeeds.
    fn clear(&self) -> Result<()>;
}

/// Pick the backend for the current runtime environment.
pub fn default_store() -> Result<Arc<dyn CredentialStore>> {
    if crate::env::should_skip_keyring() {
        log::debug!(
            "[Keyring] {} environment, using file credential store",
            crate::env::Environment::current()
        );
        return Ok(Arc::new(FileStore::in_config_dir()?));
    }
    Ok(Arc::new(KeyringStore::new()))
}

/// Categorized keyring access errors for better user feedback.
#[derive(Debug)]
pub enum KeyringAccessError {
    /// Keyring is locked and requires user interaction to unlock.
    Locked(String),
    /// Entry does not exist (normal when logged out).
    NotFound,
    /// Access denied, likely due to binary signature change.
    AccessDenied(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked(msg) => write!(f, "Keyring locked: {msg}"),
            Self::NotFound => write!(f, "Keyring entry not found"),
            Self::AccessDenied(msg) => write!(f, "Keyring access denied: {msg}"),
            Self::Other(msg) => write!(f, "Keyring error: {msg}"),
        }
    }
}

impl std::error::Error for KeyringAccessError {}

/// Categorize a keyring error for better user feedback.
fn categorize_keyring_error(err: &keyring::Error) -> KeyringAccessError {
    if matches!(err, keyring::Error::NoEntry) {
        return KeyringAccessError::NotFound;
    }

    let msg = format!("{err:?}");
    let msg_lower = msg.to_lowercase();

    if msg_lower.contains("no password") || msg_lower.contains("not found") {
        return KeyringAccessError::NotFound;
    }

    if msg_lower.contains("user interaction") || msg_lower.contains("user canceled") {
        return KeyringAccessError::Locked(msg);
    }

    if msg_lower.contains("denied")
        || msg_lower.contains("codesign")
        || msg_lower.contains("not allowed")
    {
        return KeyringAccessError::AccessDenied(msg);
    }

    KeyringAccessError::Other(msg)
}

/// OS keyring backend.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
    key: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringStore {
    /// Store under the well-known service and key.
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
            key: CREDENTIAL_KEY.to_string(),
        }
    }

    fn entry(&self) -> std::result::Result<Entry, KeyringAccessError> {
        Entry::new(&self.service, &self.key)
            .map_err(|e| KeyringAccessError::Other(format!("Failed to create entry: {e:?}")))
    }

    fn try_load(&self) -> std::result::Result<String, KeyringAccessError> {
        self.entry()?
            .get_password()
            .map_err(|e| categorize_keyring_error(&e))
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self) -> Result<Option<String>> {
        let mut last_error: Option<KeyringAccessError> = None;

        for attempt in 0..KEYRING_RETRY_ATTEMPTS {
            if attempt > 0 {
                log::debug!(
                    "[Keyring] Retrying keyring access (attempt {}/{})",
                    attempt + 1,
                    KEYRING_RETRY_ATTEMPTS
                );
                thread::sleep(Duration::from_millis(KEYRING_RETRY_DELAY_MS));
            }

            match self.try_load() {
                Ok(token) => return Ok(Some(token)),
                Err(KeyringAccessError::NotFound) => return Ok(None),
                Err(err) => {
                    log::debug!("[Keyring] Access attempt {} failed: {}", attempt + 1, err);
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err @ KeyringAccessError::AccessDenied(_)) => {
                log::info!(
                    "[Keyring] Hint: binary signature may have changed. \
                     Unlock your keychain or log in again."
                );
                Err(err.into())
            }
            Some(err) => Err(err.into()),
            None => Ok(None),
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .map_err(|e| anyhow::anyhow!("Failed to store credential in keyring: {e:?}"))?;
        log::debug!("[Keyring] Saved credential to OS keyring");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => {
                log::debug!("[Keyring] Deleted credential from OS keyring");
                Ok(())
            }
            Err(e) => match categorize_keyring_error(&e) {
                KeyringAccessError::NotFound => Ok(()),
                other => Err(other.into()),
            },
        }
    }
}

/// File backend with owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store the credential at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store the credential in the config directory.
    pub fn in_config_dir() -> Result<Self> {
        Ok(Self::new(crate::Config::config_dir()?.join(CREDENTIAL_KEY)))
    }

    /// Location of the credential file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CredentialStore for FileStore {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let token = content.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    fn save(&self, token: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, token)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;

        log::debug!("[Keyring] Saved credential to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// In-process backend; the credential does not survive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    token: Mutex<Option<String>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.token.lock().expect("MemoryStore mutex poisoned").clone())
    }

    fn save(&self, token: &str) -> Result<()> {
        *self.token.lock().expect("MemoryStore mutex poisoned") = Some(token.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.token.lock().expect("MemoryStore mutex poisoned").take();
        Ok(())
    }
}
