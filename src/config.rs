//! Configuration loading and persistence.
//!
//! Reads `config.json` from the config directory, then applies `BOOKING_*`
//! environment overrides. The credential is never part of the config file;
//! it lives in the credential store (see [`crate::keyring`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::constants;

/// Configuration for the notification client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Origin of the booking server (scheme, host, port).
    pub server_url: String,
    /// Path prefix of the HTTP API.
    pub api_path: String,
    /// Path of the push endpoint.
    pub push_path: String,
    /// Per-user destination to subscribe to after the handshake.
    pub destination: String,
    /// Timeout in seconds for each HTTP request.
    pub http_timeout_secs: u64,
    /// Drop reconciliation results that arrive after the identity that
    /// requested them has been replaced or cleared.
    pub suppress_stale_fetch: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: constants::DEFAULT_SERVER_URL.to_string(),
            api_path: constants::DEFAULT_API_PATH.to_string(),
            push_path: constants::DEFAULT_PUSH_PATH.to_string(),
            destination: constants::USER_NOTIFICATION_DESTINATION.to_string(),
            http_timeout_secs: constants::HTTP_REQUEST_TIMEOUT.as_secs(),
            suppress_stale_fetch: false,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/booking-notify-test`
    /// 2. `BOOKING_CONFIG_DIR` env var: explicit override
    /// 3. Default: platform config dir joined with `booking-notify`
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/booking-notify-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("BOOKING_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join(constants::APP_DIR_NAME)
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the config directory, with environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads `config.json` from `dir`. A missing file yields defaults.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
    }

    /// Applies `BOOKING_*` overrides using `lookup` to read variables.
    ///
    /// Unparseable numeric or boolean values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("BOOKING_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(push_path) = lookup("BOOKING_PUSH_PATH") {
            self.push_path = push_path;
        }

        if let Some(timeout) = lookup("BOOKING_HTTP_TIMEOUT") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.http_timeout_secs = secs,
                Err(_) => log::warn!("Ignoring BOOKING_HTTP_TIMEOUT={timeout}: not a number"),
            }
        }

        if let Some(flag) = lookup("BOOKING_SUPPRESS_STALE_FETCH") {
            match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.suppress_stale_fetch = true,
                "0" | "false" | "no" => self.suppress_stale_fetch = false,
                _ => log::warn!("Ignoring BOOKING_SUPPRESS_STALE_FETCH={flag}"),
            }
        }
    }

    /// Persists the configuration to `dir/config.json`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join("config.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// HTTP request timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Base URL of the HTTP API, without a trailing slash.
    pub fn api_base_url(&self) -> String {
        format!(
            "{}{}",
            self.server_url.trim_end_matches('/'),
            self.api_path.trim_end_matches('/')
        )
    }

    /// Push endpoint URL carrying `credential` as the `token` query parameter.
    ///
    /// The credential travels in the query string, not in a header.
    pub fn push_url(&self, credential: &str) -> Result<String> {
        let base = format!(
            "{}{}",
            crate::ws::http_to_ws_scheme(self.server_url.trim_end_matches('/')),
            self.push_path
        );
        let mut url = reqwest::Url::parse(&base)
            .with_context(|| format!("invalid push endpoint URL: {base}"))?;
        url.query_pairs_mut()
            .append_pair(constants::PUSH_TOKEN_PARAM, credential);
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_url, "http://localhost:8080");
        assert_eq!(config.api_path, "/api");
        assert_eq!(config.push_path, "/ws");
        assert_eq!(config.destination, "/user/queue/notifications");
        assert_eq!(config.http_timeout_secs, 10);
        assert!(!config.suppress_stale_fetch);
    }

    #[test]
    fn test_api_base_url_trims_slashes() {
        let config = Config {
            server_url: "https://book.example.com/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.api_base_url(), "https://book.example.com/api");
    }

    #[test]
    fn test_push_url_carries_token_as_query_param() {
        let config = Config::default();
        let url = config.push_url("aaa.bbb.ccc").unwrap();
        assert_eq!(url, "ws://localhost:8080/ws?token=aaa.bbb.ccc");
    }

    #[test]
    fn test_push_url_https_becomes_wss() {
        let config = Config {
            server_url: "https://book.example.com".to_string(),
            ..Config::default()
        };
        let url = config.push_url("t").unwrap();
        assert_eq!(url, "wss://book.example.com/ws?token=t");
    }

    #[test]
    fn test_push_url_encodes_reserved_characters() {
        let url = Config::default().push_url("a+b=c&d").unwrap();
        assert!(url.ends_with("?token=a%2Bb%3Dc%26d"));
    }

    #[test]
    fn test_push_url_follows_sockjs_websocket_path() {
        let mut config = Config::default();
        config.apply_env_overrides(|k| {
            (k == "BOOKING_PUSH_PATH").then(|| "/ws/websocket".to_string())
        });
        let url = config.push_url("t").unwrap();
        assert_eq!(url, "ws://localhost:8080/ws/websocket?token=t");
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BOOKING_SERVER_URL", "https://override.example.com"),
            ("BOOKING_PUSH_PATH", "/ws/websocket"),
            ("BOOKING_HTTP_TIMEOUT", "3"),
            ("BOOKING_SUPPRESS_STALE_FETCH", "true"),
        ]);
        let mut config = Config::default();
        config.apply_env_overrides(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.server_url, "https://override.example.com");
        assert_eq!(config.push_path, "/ws/websocket");
        assert_eq!(config.http_timeout(), Duration::from_secs(3));
        assert!(config.suppress_stale_fetch);
    }

    #[test]
    fn test_env_overrides_ignore_garbage() {
        let mut config = Config::default();
        config.apply_env_overrides(|k| match k {
            "BOOKING_HTTP_TIMEOUT" => Some("soon".to_string()),
            "BOOKING_SUPPRESS_STALE_FETCH" => Some("maybe".to_string()),
            _ => None,
        });
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from(dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_save_and_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"server_url": "https://partial.example.com"}"#,
        )
        .unwrap();

        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.server_url, "https://partial.example.com");
        assert_eq!(config.push_path, "/ws");

        config.save_to(dir.path()).unwrap();
        assert_eq!(Config::load_from(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_load_from_invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{not json").unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }
}
