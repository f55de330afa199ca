//! API client for the booking server.
//!
//! [`ApiClient`] implements [`AuthApi`] and [`NotificationApi`] over async
//! `reqwest`. Authenticated calls carry `Authorization: Bearer <credential>`.

use async_trait::async_trait;
use reqwest::{Client, Response};

use super::types::{ErrorBody, LoginRequest, LoginResponse, RegisterProfile, RegisterResponse};
use super::{ApiError, AuthApi, NotificationApi};
use crate::notifications::{Notification, NotificationId};
use crate::Config;

/// API client for the booking server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Creates a client for the API described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self::with_client(client, config.api_base_url()))
    }

    /// Creates an API client with a pre-configured HTTP client.
    ///
    /// `base_url` is the API root, e.g. `http://localhost:8080/api`.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns the API base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-success response into [`ApiError::Status`] with the best
/// available detail.
async fn status_error(response: Response) -> ApiError {
    let status = response.status();
    let fallback = status
        .canonical_reason()
        .map_or_else(|| status.to_string(), str::to_string);
    let detail = match response.text().await {
        Ok(body) => serde_json::from_str::<ErrorBody>(&body)
            .map(ErrorBody::detail)
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or(fallback),
        Err(_) => fallback,
    };
    ApiError::Status {
        status: status.as_u16(),
        detail,
    }
}

fn transport_error(err: &reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

#[async_trait]
impl AuthApi for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&LoginRequest { email, password })
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        response
            .json::<LoginResponse>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn register(&self, profile: &RegisterProfile) -> Result<RegisterResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(profile)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        // The body is informational; an empty or non-JSON body still means success.
        let body = response.text().await.unwrap_or_default();
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn list_pending(&self, credential: &str) -> Result<Vec<Notification>, ApiError> {
        let response = self
            .client
            .get(self.url("/notifications"))
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let items = response
            .json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(parse_notifications(items))
    }

    async fn mark_read(
        &self,
        id: NotificationId,
        credential: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut request = self.client.put(self.url(&format!("/notifications/{id}/read")));
        if let Some(credential) = credential {
            request = request.bearer_auth(credential);
        }

        let response = request.send().await.map_err(|e| transport_error(&e))?;

        if response.status().is_success() {
            log::debug!("[Router] Acknowledged notification {}", id);
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }
}

/// Parse each snapshot entry on its own. A malformed entry is logged and
/// skipped so the rest of the snapshot still gets delivered.
fn parse_notifications(items: Vec<serde_json::Value>) -> Vec<Notification> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Notification>(item) {
            Ok(notification) => Some(notification),
            Err(e) => {
                log::warn!("[Fetch] Skipping malformed notification: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_api_base_url() {
        let config = Config {
            server_url: "https://book.example.com/".to_string(),
            ..Config::default()
        };
        let client = ApiClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://book.example.com/api");
    }

    #[test]
    fn test_url_joins_paths() {
        let client = ApiClient::with_client(Client::new(), "http://localhost:8080/api/");
        assert_eq!(
            client.url("/notifications/5/read"),
            "http://localhost:8080/api/notifications/5/read"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let client = ApiClient::with_client(Client::new(), "http://127.0.0.1:1/api");
        let err = client.login("a@b.c", "pw").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
    }

    #[test]
    fn test_parse_notifications_keeps_well_formed_entries() {
        let items = vec![
            serde_json::json!({"id": 1, "message": "Booked"}),
            serde_json::json!({"id": "two", "message": "Bad id"}),
            serde_json::json!({"id": 3, "message": "Moved", "isRead": true}),
        ];
        let parsed = parse_notifications(items);
        let ids: Vec<NotificationId> = parsed.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(parsed[1].read);
    }
}
