//! Stallside Core - Shared types library.
//!
//! This crate provides common types used across all Stallside components:
//! - `live` - Order lifecycle and realtime collaboration core
//! - `integration-tests` - Full-session tests over in-memory collaborators
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no
//! transport. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, prices, and statuses

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
