//! # sigbot-core
//!
//! Core crate for the signal trading bot, providing:
//!
//! - **Types** (`types`): signals, order plans, exchange structs, tracked positions, events
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): parse/sizing/exchange/execution failures via thiserror
//! - **Deduplication** (`dedup`): bounded message-ID redelivery filter
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
