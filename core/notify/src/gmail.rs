//! Gmail API client for drafts and sends.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use drivemigrate_common::{Error, Result};

/// Gmail API base URL.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Scopes needed to create drafts and send mail.
pub const GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.compose",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Delivers composed messages.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Store `raw` as a draft; returns the draft ID.
    async fn create_draft(&self, raw: &str) -> Result<String>;

    /// Send `raw` immediately; returns the message ID.
    async fn send(&self, raw: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Gmail client acting as the authorized user (`me`).
pub struct GmailClient {
    http: Client,
    access_token: String,
    base_url: String,
}

impl GmailClient {
    /// Create a new Gmail client.
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(access_token, GMAIL_API_BASE)
    }

    /// Create a client talking to a different endpoint.
    pub fn with_base_url(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("drivemigrate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            access_token: access_token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<String> {
        let url = format!("{}/users/me/{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to reach Gmail: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let parsed: IdResponse = response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))?;
            return Ok(parsed.id);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .map(|e| e.error.message)
            .filter(|m| !m.is_empty())
            .unwrap_or(body);

        Err(match status {
            StatusCode::UNAUTHORIZED => Error::SessionExpired(message),
            StatusCode::FORBIDDEN => Error::PermissionDenied(message),
            _ => Error::Api {
                status: status.as_u16(),
                message,
            },
        })
    }
}

#[async_trait]
impl Mailer for GmailClient {
    async fn create_draft(&self, raw: &str) -> Result<String> {
        self.post("drafts", json!({ "message": { "raw": raw } }))
            .await
    }

    async fn send(&self, raw: &str) -> Result<String> {
        self.post("messages/send", json!({ "raw": raw })).await
    }
}
