//! Typed realtime events.
//!
//! Inbound and outbound traffic is a closed tagged union rather than
//! stringly-dispatched callbacks, so an unhandled event kind is a
//! compile-time concern. On the wire each event travels as a JSON envelope
//! `{"event": <name>, "payload": <object>}` using the protocol's event
//! names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use stallside_core::{OrderId, OrderStatus, UserId};

use crate::error::AppError;
use crate::models::{ProofRef, StoredMessage};

/// Payload for order status-change events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    /// The order the event pertains to.
    pub order_id: OrderId,
    /// The new status.
    pub status: OrderStatus,
    #[serde(default)]
    pub seller_confirmed: bool,
    #[serde(default)]
    pub buyer_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_proof: Option<ProofRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_proof: Option<ProofRef>,
}

impl From<&crate::models::Order> for OrderEvent {
    fn from(order: &crate::models::Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            seller_confirmed: order.seller_confirmed,
            buyer_confirmed: order.buyer_confirmed,
            seller_proof: order.seller_proof.clone(),
            buyer_proof: order.buyer_proof.clone(),
        }
    }
}

/// Payload for order cancellation events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationEvent {
    pub order_id: OrderId,
    pub reason: String,
}

/// Payload for read-receipt events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceiptEvent {
    pub order_id: OrderId,
    /// Who read the conversation.
    pub reader_id: UserId,
}

/// Payload for single-user presence events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub user_id: UserId,
}

/// Payload for the bulk presence snapshot delivered after (re)connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshotEvent {
    pub user_ids: Vec<UserId>,
}

/// Payload for room-scoped typing indicator events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub order_id: OrderId,
    pub user_id: UserId,
    /// `true` when the user started typing, `false` when they stopped.
    pub started: bool,
}

/// Every event kind the realtime channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderNew,
    OrderUpdated,
    OrderCancelled,
    MessageReceived,
    MessageReadReceipt,
    UserOnline,
    UserOffline,
    InitialOnlineUsers,
    Typing,
}

impl EventKind {
    /// The protocol name for this event kind.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::OrderNew => "order:new",
            Self::OrderUpdated => "order:updated",
            Self::OrderCancelled => "order:cancelled",
            Self::MessageReceived => "message_received",
            Self::MessageReadReceipt => "message_read_receipt",
            Self::UserOnline => "user:online",
            Self::UserOffline => "user:offline",
            Self::InitialOnlineUsers => "initial_online_users",
            Self::Typing => "typing",
        }
    }
}

/// A typed realtime event, inbound or outbound.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    OrderNew(OrderEvent),
    OrderUpdated(OrderEvent),
    OrderCancelled(CancellationEvent),
    MessageReceived(StoredMessage),
    MessageReadReceipt(ReadReceiptEvent),
    UserOnline(PresenceEvent),
    UserOffline(PresenceEvent),
    InitialOnlineUsers(PresenceSnapshotEvent),
    Typing(TypingEvent),
}

impl LiveEvent {
    /// The kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::OrderNew(_) => EventKind::OrderNew,
            Self::OrderUpdated(_) => EventKind::OrderUpdated,
            Self::OrderCancelled(_) => EventKind::OrderCancelled,
            Self::MessageReceived(_) => EventKind::MessageReceived,
            Self::MessageReadReceipt(_) => EventKind::MessageReadReceipt,
            Self::UserOnline(_) => EventKind::UserOnline,
            Self::UserOffline(_) => EventKind::UserOffline,
            Self::InitialOnlineUsers(_) => EventKind::InitialOnlineUsers,
            Self::Typing(_) => EventKind::Typing,
        }
    }

    /// The room (= order) this event is scoped to.
    ///
    /// Presence events span the whole session; `order:new` is delivered
    /// before the counterpart could have joined the room, so it is
    /// unscoped too.
    #[must_use]
    pub const fn room(&self) -> Option<OrderId> {
        match self {
            Self::OrderUpdated(e) => Some(e.order_id),
            Self::OrderCancelled(e) => Some(e.order_id),
            Self::MessageReceived(m) => Some(m.order_id),
            Self::MessageReadReceipt(e) => Some(e.order_id),
            Self::Typing(e) => Some(e.order_id),
            Self::OrderNew(_)
            | Self::UserOnline(_)
            | Self::UserOffline(_)
            | Self::InitialOnlineUsers(_) => None,
        }
    }

    /// Serialize to the `{"event", "payload"}` wire envelope.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the payload cannot be serialized.
    pub fn to_envelope(&self) -> Result<Value, AppError> {
        let payload = match self {
            Self::OrderNew(e) | Self::OrderUpdated(e) => serde_json::to_value(e),
            Self::OrderCancelled(e) => serde_json::to_value(e),
            Self::MessageReceived(m) => serde_json::to_value(m),
            Self::MessageReadReceipt(e) => serde_json::to_value(e),
            Self::UserOnline(e) | Self::UserOffline(e) => serde_json::to_value(e),
            Self::InitialOnlineUsers(e) => serde_json::to_value(e),
            Self::Typing(e) => serde_json::to_value(e),
        }
        .map_err(|e| AppError::Transport(e.to_string()))?;

        Ok(serde_json::json!({
            "event": self.kind().wire_name(),
            "payload": payload,
        }))
    }

    /// Decode an event from its wire name and payload.
    ///
    /// Unknown event names decode to `Ok(None)` so newer servers do not
    /// break older clients.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the payload does not match the named event.
    pub fn from_envelope(name: &str, payload: Value) -> Result<Option<Self>, AppError> {
        fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, AppError> {
            serde_json::from_value(payload).map_err(|e| AppError::Transport(e.to_string()))
        }

        let event = match name {
            "order:new" => Self::OrderNew(decode(payload)?),
            "order:updated" => Self::OrderUpdated(decode(payload)?),
            "order:cancelled" => Self::OrderCancelled(decode(payload)?),
            "message_received" => Self::MessageReceived(decode(payload)?),
            "message_read_receipt" => Self::MessageReadReceipt(decode(payload)?),
            "user:online" => Self::UserOnline(decode(payload)?),
            "user:offline" => Self::UserOffline(decode(payload)?),
            "initial_online_users" => Self::InitialOnlineUsers(decode(payload)?),
            "typing" => Self::Typing(decode(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}
