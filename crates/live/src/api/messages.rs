//! Message persistence API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stallside_core::OrderId;

use crate::error::AppError;
use crate::models::{ConversationSummary, StoredMessage};

use super::ApiClient;

/// One page of a conversation.
///
/// Messages are in ascending chronological order. `offset` pages backwards
/// from the newest message: offset 0 is the newest page, and larger
/// offsets reach strictly older messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    /// The page's messages, oldest first.
    pub messages: Vec<StoredMessage>,
    /// Whether older messages remain beyond this page.
    pub has_more: bool,
}

/// The consumed message persistence interface.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Load one page of the conversation, skipping the `offset` newest
    /// messages.
    async fn list(&self, order_id: OrderId, limit: u32, offset: u32)
    -> Result<MessagePage, AppError>;

    /// Persist a message; the backend assigns the id and timestamp.
    async fn send(&self, order_id: OrderId, body: &str) -> Result<StoredMessage, AppError>;

    /// Mark every unread message in the conversation as read by the caller.
    async fn mark_read(&self, order_id: OrderId) -> Result<(), AppError>;

    /// Per-order unread counts and last-message previews.
    async fn conversations(&self) -> Result<Vec<ConversationSummary>, AppError>;
}

/// `MessageApi` over the hosted REST backend.
#[derive(Clone)]
pub struct HttpMessageApi {
    client: ApiClient,
}

impl HttpMessageApi {
    /// Create a message API over the shared client.
    #[must_use]
    pub const fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn list(
        &self,
        order_id: OrderId,
        limit: u32,
        offset: u32,
    ) -> Result<MessagePage, AppError> {
        self.client
            .get(
                &format!("orders/{order_id}/messages"),
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await
    }

    async fn send(&self, order_id: OrderId, body: &str) -> Result<StoredMessage, AppError> {
        self.client
            .post(
                &format!("orders/{order_id}/messages"),
                &serde_json::json!({"body": body}),
            )
            .await
    }

    async fn mark_read(&self, order_id: OrderId) -> Result<(), AppError> {
        self.client
            .post_empty(
                &format!("orders/{order_id}/messages/read"),
                &serde_json::json!({}),
            )
            .await
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>, AppError> {
        self.client.get("conversations", &[]).await
    }
}
