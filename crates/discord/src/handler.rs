//! Discord event handler for serenity.
//!
//! The bot only pushes notifications, so the handler just tracks
//! connection state for the logs.

use {
    serenity::{
        all::{Context, EventHandler, GatewayIntents, Ready, ResumedEvent},
        async_trait,
    },
    tracing::info,
};

/// Handler for Discord gateway events.
#[derive(Debug, Default)]
pub struct DiscordHandler;

impl DiscordHandler {
    /// Required gateway intents for the bot.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::DIRECT_MESSAGES
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "discord bot ready"
        );
    }

    async fn resume(&self, _ctx: Context, _event: ResumedEvent) {
        info!("discord gateway session resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_cover_guilds_and_dms() {
        let intents = DiscordHandler::intents();
        assert!(intents.contains(GatewayIntents::GUILDS));
        assert!(intents.contains(GatewayIntents::DIRECT_MESSAGES));
        assert!(!intents.contains(GatewayIntents::MESSAGE_CONTENT));
    }
}
