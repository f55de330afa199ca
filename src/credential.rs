//! Credential codec.
//!
//! Turns the signed token issued by `/api/auth/login` into an [`Identity`].
//! The token is a JWT-shaped string (`header.payload.signature`); only the
//! payload is read. Signature verification belongs to the issuing server,
//! which rejects forged tokens on every authenticated request.
//!
//! # Claims
//!
//! | Claim    | Meaning                        |
//! |----------|--------------------------------|
//! | `sub`    | Subject (the account email)    |
//! | `role`   | `ROLE_CUSTOMER` / `ROLE_PROVIDER` / `ROLE_ADMIN` |
//! | `userId` | Server-side user id (number or string) |
//! | `exp`    | Expiry, epoch seconds          |

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Errors produced while turning a credential into an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Token structure, encoding, or claims could not be parsed.
    Malformed(String),
    /// Token decoded but its expiry is not in the future.
    Expired,
}

impl std::fmt::Display for CredentialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed credential: {msg}"),
            Self::Expired => write!(f, "Credential expired"),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Account role carried in the `role` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Books appointments.
    #[serde(rename = "ROLE_CUSTOMER")]
    Customer,
    /// Publishes time slots.
    #[serde(rename = "ROLE_PROVIDER")]
    Provider,
    /// Administers the platform.
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
}

impl Role {
    /// Wire form used by the server (`ROLE_*`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "ROLE_CUSTOMER",
            Self::Provider => "ROLE_PROVIDER",
            Self::Admin => "ROLE_ADMIN",
        }
    }

    /// Parse a role name, case-insensitively, with or without the `ROLE_` prefix.
    pub fn parse(value: &str) -> Option<Self> {
        let upper = value.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("ROLE_").unwrap_or(&upper);
        match name {
            "CUSTOMER" => Some(Self::Customer),
            "PROVIDER" => Some(Self::Provider),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown role: {s}"))
    }
}

/// Authenticated identity derived from a credential.
///
/// Only [`decode`] builds one, so every `Identity` in the process is backed
/// by a token that was actually issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    subject: String,
    role: Role,
    user_id: String,
    expires_at: DateTime<Utc>,
}

impl Identity {
    /// Subject claim (the account email).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Account role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Server-side user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Instant after which the credential is no longer accepted.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Shorthand for [`has_any_role`] with a single role.
    pub fn has_role(&self, role: Role) -> bool {
        has_any_role(self, &[role])
    }
}

/// Raw payload claims.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    role: String,
    #[serde(rename = "userId")]
    user_id: serde_json::Value,
    exp: i64,
}

/// Decode a credential into an [`Identity`].
///
/// Does not check expiry; pair with [`is_expired`].
pub fn decode(token: &str) -> Result<Identity, CredentialError> {
    let mut parts = token.trim().split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_header), Some(payload), Some(_signature), None) => payload,
        _ => {
            return Err(CredentialError::Malformed(
                "expected three dot-separated segments".to_string(),
            ))
        }
    };

    // Some issuers keep base64 padding on the payload segment.
    let bytes = BASE64URL
        .decode(payload.trim_end_matches('='))
        .map_err(|e| CredentialError::Malformed(format!("payload is not base64url: {e}")))?;

    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| CredentialError::Malformed(format!("invalid claims: {e}")))?;

    let role = Role::parse(&claims.role)
        .ok_or_else(|| CredentialError::Malformed(format!("unknown role: {}", claims.role)))?;

    let user_id = match claims.user_id {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            return Err(CredentialError::Malformed(format!(
                "userId must be a string or number, got {other}"
            )))
        }
    };

    let expires_at = Utc
        .timestamp_opt(claims.exp, 0)
        .single()
        .ok_or_else(|| CredentialError::Malformed(format!("exp out of range: {}", claims.exp)))?;

    Ok(Identity {
        subject: claims.sub,
        role,
        user_id,
        expires_at,
    })
}

/// Returns `true` once `now` has reached the identity's expiry.
pub fn is_expired(identity: &Identity, now: DateTime<Utc>) -> bool {
    identity.expires_at <= now
}

/// Decode and reject expired credentials in one step.
pub fn decode_valid(token: &str, now: DateTime<Utc>) -> Result<Identity, CredentialError> {
    let identity = decode(token)?;
    if is_expired(&identity, now) {
        return Err(CredentialError::Expired);
    }
    Ok(identity)
}

/// Capability check shared by every consumer that gates on role.
///
/// An empty `roles` slice admits any authenticated identity.
pub fn has_any_role(identity: &Identity, roles: &[Role]) -> bool {
    roles.is_empty() || roles.contains(&identity.role)
}

/// Mask a credential for log output, keeping only a short prefix.
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}…({} chars)", token.len())
}
