//! Client for the platform's conversation REST API.
//!
//! The backend owns all authoritative conversation state; this client
//! fetches and mutates it. Realtime delivery happens over the relay
//! connection, with [`ApiClient::send_message`] kept as the fallback
//! mutation for when the socket is down.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use courier_types::api::{CreateConversationRequest, Page, SendMessageRequest};
use courier_types::models::{Conversation, ConversationId, Message, UserId};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0} returned {1}")]
    Status(String, StatusCode),
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Bearer-authenticated client for the conversation endpoints.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// One page of the caller's conversations, most recently active first.
    pub async fn conversations(&self, page: u32) -> Result<Page<Conversation>> {
        self.get(&format!("conversations?page={}", page)).await
    }

    pub async fn conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.get(&format!("conversations/{}", id)).await
    }

    /// Fetch or create the conversation with `user_id`. The backend returns
    /// the existing conversation when one exists.
    pub async fn conversation_with_user(&self, user_id: UserId) -> Result<Conversation> {
        let resp = self
            .http
            .post(self.url("conversations"))
            .bearer_auth(&self.token)
            .json(&CreateConversationRequest { user_id })
            .send()
            .await?;
        Ok(checked(resp, "POST conversations")?.json().await?)
    }

    pub async fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        let path = format!("conversations/{}", id);
        let resp = self
            .http
            .delete(self.url(&path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        checked(resp, &format!("DELETE {}", path))?;
        debug!("deleted conversation {}", id);
        Ok(())
    }

    /// One page of a conversation's history, newest message first. Callers
    /// wanting display order reverse the page.
    pub async fn conversation_messages(
        &self,
        id: ConversationId,
        page: u32,
    ) -> Result<Page<Message>> {
        self.get(&format!("conversations/{}/messages?page={}", id, page))
            .await
    }

    /// Send over REST instead of the relay. The realtime path is preferred;
    /// this is the degraded-mode fallback.
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: impl Into<String>,
        media: Option<String>,
    ) -> Result<Message> {
        let path = format!("conversations/{}/messages", conversation_id);
        let resp = self
            .http
            .post(self.url(&path))
            .bearer_auth(&self.token)
            .json(&SendMessageRequest {
                content: content.into(),
                media,
            })
            .send()
            .await?;
        Ok(checked(resp, &format!("POST {}", path))?.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(checked(resp, &format!("GET {}", path))?.json().await?)
    }
}

fn checked(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ApiError::Status(what.to_string(), status))
    }
}
