use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::Serialize;
use url::Url;

use super::{AccountApi, ApiEnvelope, Credentials};
use crate::error::{Result, SyncError};
use crate::storage::{keys, StorageAdapter};

const USER_AGENT: &str = concat!("adhan-sync/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed account API. Reads the bearer token from storage on every
/// call so it always uses whatever session is current.
pub struct HttpAccountApi {
    base_url: Url,
    storage: Arc<dyn StorageAdapter>,
    http: HttpClient,
}

impl HttpAccountApi {
    pub fn new(base_url: &str, storage: Arc<dyn StorageAdapter>) -> Result<Self> {
        // Trailing slash so `join` appends instead of replacing the last segment
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| SyncError::Validation(format!("invalid API base URL: {}", e)))?;

        let http = HttpClient::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| SyncError::network(e.to_string()))?;

        Ok(Self {
            base_url,
            storage,
            http,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| SyncError::Validation(e.to_string()))
    }

    async fn bearer(&self) -> Result<Option<String>> {
        self.storage.get(keys::AUTH_TOKEN).await
    }

    async fn get_with_auth(&self, path: &str) -> Result<ApiEnvelope> {
        let mut request = self.http.get(self.url(path)?);
        if let Some(token) = self.bearer().await? {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::network(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiEnvelope> {
        let response = self
            .http
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| SyncError::network(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<ApiEnvelope> {
        let status = response.status();

        if !status.is_success() {
            let body: ApiEnvelope = response
                .json()
                .await
                .unwrap_or_else(|_| ApiEnvelope::failure(format!("Request failed: {}", status)));
            let message = body.message_or(&format!("Request failed: {}", status));
            return Err(SyncError::api(status.as_u16(), message));
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::network(e.to_string()))
    }
}

#[async_trait]
impl AccountApi for HttpAccountApi {
    async fn get_user(&self) -> Result<ApiEnvelope> {
        self.get_with_auth("/users/me").await
    }

    async fn verify_auth(&self) -> Result<ApiEnvelope> {
        match self.get_with_auth("/auth/verify").await {
            Err(SyncError::Api {
                status: Some(code),
                message,
            }) if code == StatusCode::UNAUTHORIZED.as_u16()
                || code == StatusCode::FORBIDDEN.as_u16() =>
            {
                // An explicit rejection, not a transport failure
                Ok(ApiEnvelope::failure(message))
            }
            other => other,
        }
    }

    async fn login_with_credentials(&self, credentials: &Credentials) -> Result<ApiEnvelope> {
        match self.post("/auth/login", credentials).await {
            Err(SyncError::Api {
                status: Some(code),
                message,
            }) if code == StatusCode::UNAUTHORIZED.as_u16() => Ok(ApiEnvelope::failure(message)),
            other => other,
        }
    }

    async fn get_premium_purchases(&self) -> Result<ApiEnvelope> {
        self.get_with_auth("/premium/purchases").await
    }
}

impl std::fmt::Debug for HttpAccountApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAccountApi")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_url_join_keeps_base_path() {
        let api = HttpAccountApi::new("https://api.example.com/v1/", Arc::new(MemoryStorage::new()))
            .unwrap();
        assert_eq!(
            api.url("/auth/verify").unwrap().as_str(),
            "https://api.example.com/v1/auth/verify"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpAccountApi::new("not a url", Arc::new(MemoryStorage::new())).is_err());
    }
}
