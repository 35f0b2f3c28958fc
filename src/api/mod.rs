//! Remote account API.
//!
//! Every call answers with the same loose envelope (`success`, optional
//! `data` and `message`, plus whatever else the endpoint adds at the top
//! level, e.g. a `token`). Transport failures surface as `Err`; a reachable
//! server that refuses the request answers `Ok` with `success == false`.

mod http;
pub mod normalize;

pub use http::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl ApiEnvelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Attach a top-level field, e.g. a token returned beside `data`.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.rest.insert(key.to_string(), value);
        self
    }

    pub fn message_or(&self, fallback: &str) -> String {
        self.message.clone().unwrap_or_else(|| fallback.to_string())
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait AccountApi: Send + Sync {
    /// The account behind the stored auth token. 404 when there is none.
    async fn get_user(&self) -> Result<ApiEnvelope>;

    /// Whether the stored auth token is still accepted.
    async fn verify_auth(&self) -> Result<ApiEnvelope>;

    async fn login_with_credentials(&self, credentials: &Credentials) -> Result<ApiEnvelope>;

    /// Purchase history for the account; `data` is an array of purchases.
    async fn get_premium_purchases(&self) -> Result<ApiEnvelope>;
}
