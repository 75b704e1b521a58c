//! Discord delivery for medbot notifications.
//!
//! [`DiscordOutbound`] implements [`medbot_channels::MessageSink`] over
//! serenity's HTTP client; [`DiscordHandler`] receives gateway events.

pub mod handler;
pub mod outbound;

pub use {
    handler::DiscordHandler,
    outbound::{DISCORD_MAX_MESSAGE_LEN, DiscordOutbound},
};
