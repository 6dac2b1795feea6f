//! Stallside Live - order lifecycle and realtime collaboration core.
//!
//! This crate keeps a buyer and a seller synchronized while an order is in
//! flight. It is embedded in a host session (the host owns rendering,
//! auth and storage) and provides:
//!
//! - [`orders::OrderLifecycle`] - the order state machine with its
//!   dual-confirmation completion protocol
//! - [`messaging::MessagingEngine`] - per-order conversations with
//!   optimistic sends, pagination and typing indicators
//! - [`presence::PresenceTracker`] - best-effort online/offline state
//! - [`notify::NotificationDispatcher`] - serialized visible+audible
//!   alerts
//! - [`transport`] - the room-based event channel all of the above share
//!
//! [`session::LiveSession`] wires one of each together per authenticated
//! participant.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod config;
pub mod error;
pub mod messaging;
pub mod models;
pub mod notify;
pub mod orders;
pub mod presence;
pub mod session;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{AppError, Result};
