//! Request/response bodies for the booking server API.

use serde::{Deserialize, Serialize};

use crate::credential::Role;

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    /// Account email.
    pub email: &'a str,
    /// Account password.
    pub password: &'a str,
}

/// Successful login response. Only `token` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    /// Signed credential.
    pub token: String,
    /// Token type, normally `Bearer`.
    #[serde(default, rename = "type")]
    pub token_type: Option<String>,
    /// Account email echoed by the server.
    #[serde(default)]
    pub email: Option<String>,
    /// Granted roles.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Profile submitted to `POST /auth/register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterProfile {
    /// Display name.
    pub name: String,
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
    /// Requested role; only customer and provider may self-register.
    pub role: Role,
}

/// Registration response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterResponse {
    /// Confirmation text, e.g. "User registered successfully!".
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body shapes the server produces.
///
/// Either `{"message": "..."}` or a field-error map
/// `{"email": "must be a well-formed email address", ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ErrorBody {
    Message { message: String },
    Fields(std::collections::BTreeMap<String, String>),
}

impl ErrorBody {
    /// Human-readable detail.
    pub(crate) fn detail(self) -> String {
        match self {
            Self::Message { message } => message,
            Self::Fields(fields) => fields
                .into_iter()
                .map(|(field, msg)| format!("{field}: {msg}"))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}
