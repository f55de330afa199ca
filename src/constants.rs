//! Application-wide constants for booking-notify.
//!
//! Centralizes magic numbers, well-known keys, and protocol defaults.

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for API calls.
///
/// Applies to login, registration, the reconciliation fetch, and
/// acknowledgments. Overridable through [`crate::Config`].
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long teardown waits for a connection task to finish closing the socket.
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Server defaults
// ============================================================================

/// Default server origin.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Path prefix of the HTTP API.
pub const DEFAULT_API_PATH: &str = "/api";

/// Path of the push endpoint (WebSocket carrying STOMP frames).
///
/// A Spring endpoint registered with SockJS serves raw WebSocket one segment
/// deeper, at `/ws/websocket`. Point `push_path` there for such servers.
pub const DEFAULT_PUSH_PATH: &str = "/ws";

/// Generic per-user destination; the broker resolves it to the caller's queue.
pub const USER_NOTIFICATION_DESTINATION: &str = "/user/queue/notifications";

/// Query parameter that carries the credential on the push handshake.
pub const PUSH_TOKEN_PARAM: &str = "token";

/// Id of the single subscription a connection holds.
pub const SUBSCRIPTION_ID: &str = "sub-0";

// ============================================================================
// Persistence
// ============================================================================

/// Keyring service name.
pub const KEYRING_SERVICE: &str = "booking-notify";

/// Well-known key under which the single active credential is stored.
pub const CREDENTIAL_KEY: &str = "credential";

/// Application directory name under the platform config dir.
pub const APP_DIR_NAME: &str = "booking-notify";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_values_are_reasonable() {
        assert!(HTTP_REQUEST_TIMEOUT >= Duration::from_secs(5));
        assert!(HTTP_REQUEST_TIMEOUT <= Duration::from_secs(60));
        assert!(TEARDOWN_GRACE < HTTP_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_paths_are_absolute() {
        assert!(DEFAULT_API_PATH.starts_with('/'));
        assert!(DEFAULT_PUSH_PATH.starts_with('/'));
        assert!(USER_NOTIFICATION_DESTINATION.starts_with("/user/"));
    }
}
