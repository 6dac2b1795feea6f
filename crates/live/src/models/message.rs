//! Message domain models.
//!
//! A message shown in a conversation is in exactly one of two delivery
//! states: optimistic (`Pending`, tracked by a client-generated id) or
//! server-acknowledged (`Acknowledged`, tracked by the server id). The same
//! logical send never appears twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stallside_core::{ClientMessageId, MessageId, OrderId, UserId};

/// Delivery state of a message in the local conversation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Delivery {
    /// Inserted optimistically; the backend has not acknowledged the send.
    Pending { client_id: ClientMessageId },
    /// Acknowledged by the backend and assigned a server id.
    Acknowledged { id: MessageId },
}

impl Delivery {
    /// Whether the message is still awaiting acknowledgment.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

/// A server-acknowledged message record, as the persistence API returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Server-assigned message ID.
    pub id: MessageId,
    /// The conversation (= order) this message belongs to.
    pub order_id: OrderId,
    /// Who sent it.
    pub sender_id: UserId,
    /// Message body text.
    pub body: String,
    /// Optional attachment reference.
    pub attachment: Option<String>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
    /// Whether the recipient has read it.
    pub read: bool,
}

/// A message as held in the local conversation view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Optimistic or acknowledged.
    pub delivery: Delivery,
    /// The conversation (= order) this message belongs to.
    pub order_id: OrderId,
    /// Who sent it.
    pub sender_id: UserId,
    /// Message body text.
    pub body: String,
    /// Optional attachment reference.
    pub attachment: Option<String>,
    /// When the message was created (locally, until acknowledged).
    pub created_at: DateTime<Utc>,
    /// Whether the recipient has read it.
    pub read: bool,
}

impl ChatMessage {
    /// Build the optimistic local copy inserted at submit time.
    #[must_use]
    pub fn optimistic(order_id: OrderId, sender_id: UserId, body: String) -> Self {
        Self {
            delivery: Delivery::Pending {
                client_id: ClientMessageId::generate(),
            },
            order_id,
            sender_id,
            body,
            attachment: None,
            created_at: Utc::now(),
            read: false,
        }
    }

    /// The server id, once acknowledged.
    #[must_use]
    pub const fn server_id(&self) -> Option<MessageId> {
        match self.delivery {
            Delivery::Acknowledged { id } => Some(id),
            Delivery::Pending { .. } => None,
        }
    }

    /// The client id, while still pending.
    #[must_use]
    pub const fn client_id(&self) -> Option<ClientMessageId> {
        match self.delivery {
            Delivery::Pending { client_id } => Some(client_id),
            Delivery::Acknowledged { .. } => None,
        }
    }
}

impl From<StoredMessage> for ChatMessage {
    fn from(stored: StoredMessage) -> Self {
        Self {
            delivery: Delivery::Acknowledged { id: stored.id },
            order_id: stored.order_id,
            sender_id: stored.sender_id,
            body: stored.body,
            attachment: stored.attachment,
            created_at: stored.created_at,
            read: stored.read,
        }
    }
}

/// Per-order conversation summary, used for unread badges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The order the conversation is scoped to.
    pub order_id: OrderId,
    /// Unread messages for the querying participant.
    pub unread: u32,
    /// Preview of the most recent message, if any.
    pub last_message: Option<String>,
    /// When the most recent message was sent.
    pub last_message_at: Option<DateTime<Utc>>,
}
