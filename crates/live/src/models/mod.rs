//! Domain models for the live core.

pub mod message;
pub mod order;

pub use message::{ChatMessage, ConversationSummary, Delivery, StoredMessage};
pub use order::{
    Completion, Coordinates, DeliveryDetails, LineItemRating, Order, OrderItem, ProofRef,
};
