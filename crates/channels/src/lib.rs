//! Outbound messaging boundary.
//!
//! The notification jobs only ever post text to a channel id or DM a user id;
//! the chat-platform crate implements [`MessageSink`] for its client.

pub mod error;
pub mod sink;

pub use {
    error::{Error, Result},
    sink::{MessageSink, chunk_message},
};
