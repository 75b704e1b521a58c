use std::error::Error as StdError;

/// Crate-wide result type for outbound messaging.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed delivery errors shared by every [`crate::MessageSink`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Destination id or message text is unusable.
    #[error("invalid message target: {message}")]
    InvalidTarget { message: String },

    /// The recipient refuses direct messages or the bot cannot see the channel.
    #[error("recipient unreachable: {message}")]
    Unreachable { message: String },

    /// The platform client is not connected yet.
    #[error("messaging unavailable: {message}")]
    Unavailable { message: String },

    /// Wrapped source error from the platform SDK.
    #[error("message delivery failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// Snowflake parsing failed.
    #[error(transparent)]
    ParseInt(#[from] std::num::ParseIntError),
}

impl Error {
    #[must_use]
    pub fn invalid_target(message: impl std::fmt::Display) -> Self {
        Self::InvalidTarget {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unreachable(message: impl std::fmt::Display) -> Self {
        Self::Unreachable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
