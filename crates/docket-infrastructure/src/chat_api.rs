//! HTTP client for the chat unread-count endpoints.

use async_trait::async_trait;
use docket_core::chat::ChatCountSource;
use docket_core::config::EndpointConfig;
use docket_core::{DocketError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct UnreadCountResponse {
    #[serde(default)]
    count: u32,
}

#[derive(Debug, Serialize)]
struct MarkReadRequest<'a> {
    user_id: &'a str,
    conversation_id: &'a str,
}

/// Talks to `GET /api/chat/unread-count` and `POST /api/chat/mark-read`.
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// The REST API shares its base URL with the notification endpoint.
    pub fn from_endpoint(endpoint: &EndpointConfig) -> Self {
        Self::new(endpoint.base_url.clone())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/chat/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(DocketError::Http {
            status: Some(status.as_u16()),
            message: error_text,
        })
    }
}

fn http_error(err: reqwest::Error) -> DocketError {
    DocketError::Http {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

#[async_trait]
impl ChatCountSource for HttpChatApi {
    async fn unread_count(&self, user_id: &str) -> Result<u32> {
        let response = self
            .client
            .get(self.url("unread-count"))
            .query(&[("user_id", user_id)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(http_error)?;

        let body: UnreadCountResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(http_error)?;
        debug!("[ChatApi] Unread chat count for {} = {}", user_id, body.count);
        Ok(body.count)
    }

    async fn mark_conversation_read(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url("mark-read"))
            .json(&MarkReadRequest {
                user_id,
                conversation_id,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(http_error)?;

        Self::check(response).await?;
        Ok(())
    }
}
