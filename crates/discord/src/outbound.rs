use std::sync::Arc;

use {
    async_trait::async_trait,
    serenity::{
        all::{ChannelId, UserId},
        http::Http,
    },
    tracing::{debug, warn},
};

use medbot_channels::{Error, MessageSink, Result, chunk_message};

/// Discord's per-message content limit.
pub const DISCORD_MAX_MESSAGE_LEN: usize = 2000;

/// Outbound message sender for Discord, backed by serenity's REST client.
pub struct DiscordOutbound {
    http: Arc<Http>,
}

impl DiscordOutbound {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    /// REST-only sender for one-off commands that never open the gateway.
    pub fn from_token(token: &str) -> Self {
        Self::new(Arc::new(Http::new(token)))
    }

    async fn send_chunks(&self, channel: ChannelId, text: &str) -> Result<()> {
        for chunk in chunk_message(text, DISCORD_MAX_MESSAGE_LEN) {
            channel
                .say(self.http.as_ref(), chunk)
                .await
                .map_err(|e| classify(channel.get(), e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSink for DiscordOutbound {
    async fn post_to_channel(&self, channel_id: &str, text: &str) -> Result<()> {
        let channel = ChannelId::new(parse_snowflake(channel_id)?);
        self.send_chunks(channel, text).await?;
        debug!(channel_id, "discord channel message sent");
        Ok(())
    }

    async fn direct_message(&self, user_id: &str, text: &str) -> Result<()> {
        let user = UserId::new(parse_snowflake(user_id)?);
        let dm = user
            .create_dm_channel(self.http.as_ref())
            .await
            .map_err(|e| {
                warn!(user_id, error = %e, "failed to open discord DM channel");
                classify(user.get(), e)
            })?;
        self.send_chunks(dm.id, text).await?;
        debug!(user_id, "discord direct message sent");
        Ok(())
    }
}

/// Parse a Discord id. Zero is rejected because serenity's id types
/// cannot hold it.
pub fn parse_snowflake(raw: &str) -> Result<u64> {
    let id: u64 = raw.trim().parse()?;
    if id == 0 {
        return Err(Error::invalid_target("discord ids are never zero"));
    }
    Ok(id)
}

fn classify(target: u64, error: serenity::Error) -> Error {
    if let serenity::Error::Http(http_error) = &error
        && let Some(status) = http_error.status_code()
        && matches!(status.as_u16(), 403 | 404)
    {
        return Error::unreachable(format!("{target}: {error}"));
    }
    Error::external(format!("discord send to {target}"), error)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("123456789012345678", Some(123_456_789_012_345_678))]
    #[case(" 42 ", Some(42))]
    #[case("0", None)]
    #[case("", None)]
    #[case("abc", None)]
    #[case("-5", None)]
    fn snowflake_parsing(#[case] raw: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_snowflake(raw).ok(), expected);
    }

    #[test]
    fn zero_id_is_invalid_target() {
        assert!(matches!(
            parse_snowflake("0"),
            Err(Error::InvalidTarget { .. })
        ));
        assert!(matches!(parse_snowflake("x"), Err(Error::ParseInt(_))));
    }

    #[test]
    fn long_messages_fit_discord_limit() {
        let line = "• Jun 16, 2025, 9:00 AM — **Anatomy lecture** (Hall A)\n";
        let text = line.repeat(80);
        let chunks = chunk_message(&text, DISCORD_MAX_MESSAGE_LEN);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= DISCORD_MAX_MESSAGE_LEN));
        assert!(chunks.iter().all(|c| c.starts_with('•')));
    }
}
