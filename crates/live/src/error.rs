//! Unified error handling for the live core.
//!
//! Provides a single `AppError` type returned by every fallible operation.
//! State-machine validation failures never mutate local state; network
//! failures during an optimistic send roll the optimistic entry back.

use thiserror::Error;

use stallside_core::OrderStatus;

use crate::config::ConfigError;

/// Application-level error type for the live core.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required field is missing or malformed (e.g. an empty cancellation
    /// reason, or a seller completion without a delivery proof).
    #[error("validation error: {0}")]
    Validation(String),

    /// A transition was attempted from a state that does not permit it.
    #[error("cannot {action} an order that is {status}")]
    InvalidState {
        /// The attempted action, for display near the initiating control.
        action: &'static str,
        /// The status the order was in when the action was attempted.
        status: OrderStatus,
    },

    /// The hosted API or transport is unreachable.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A referenced order or conversation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The hosted API reported a failure.
    #[error("api error: {0}")]
    Api(String),

    /// The realtime channel rejected an operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl AppError {
    /// Build a validation error from any message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Build an invalid-state error for `action` attempted at `status`.
    #[must_use]
    pub const fn invalid_state(action: &'static str, status: OrderStatus) -> Self {
        Self::InvalidState { action, status }
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
