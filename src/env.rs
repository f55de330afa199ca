//! Runtime environment detection.
//!
//! Single source of truth for the runtime environment, read from the
//! `BOOKING_ENV` environment variable.
//!
//! # Environment Variable
//!
//! Set `BOOKING_ENV` to one of:
//! - `test` - Test mode (credentials go to a file instead of the OS keyring)
//! - (anything else or unset) - Production mode

/// Runtime environment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Test environment - uses file storage for the credential.
    Test,
}

impl Environment {
    /// Detect current environment from `BOOKING_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::from_value(std::env::var("BOOKING_ENV").ok().as_deref())
    }

    fn from_value(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            _ => Self::Production,
        }
    }

    /// Returns `true` if this is the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Returns `true` if the OS keyring should be bypassed.
///
/// Test runs must never prompt for keychain access.
#[must_use]
pub fn should_skip_keyring() -> bool {
    Environment::current().is_test()
}
