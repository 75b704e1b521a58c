//! Config schema: Discord credentials, database, feed fetching, the job
//! scheduler, and notification output.

use {
    chrono_tz::Tz,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MedbotConfig {
    pub discord: DiscordConfig,
    pub database: DatabaseConfig,
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
    pub notifications: NotificationsConfig,
}

impl MedbotConfig {
    /// Check values that would only fail later, deep inside a job.
    pub fn validate(&self) -> Result<()> {
        parse_tz("scheduler.timezone", &self.scheduler.timezone)?;
        parse_tz(
            "notifications.display_timezone",
            &self.notifications.display_timezone,
        )?;
        if self.database.max_connections == 0 {
            return Err(Error::invalid("database.max_connections", "must be > 0"));
        }
        if self.fetch.max_bytes == 0 {
            return Err(Error::invalid("fetch.max_bytes", "must be > 0"));
        }
        if self.notifications.digest_window_days <= 0 {
            return Err(Error::invalid(
                "notifications.digest_window_days",
                "must be > 0",
            ));
        }
        if self.notifications.digest_display_limit > self.notifications.digest_fetch_limit {
            return Err(Error::invalid(
                "notifications.digest_display_limit",
                "must not exceed digest_fetch_limit",
            ));
        }
        Ok(())
    }
}

/// Bot credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    pub application_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://medbot.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// Limits for downloading subscribed ICS feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_bytes: usize,
    pub max_redirects: u8,
    pub timeout_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024,
            max_redirects: 3,
            timeout_seconds: 30,
        }
    }
}

/// Cron expressions for the four notification jobs.
///
/// Weekday fields follow the `cron` crate, where `1` is Sunday; prefer names
/// (`Mon`, `Tue`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// IANA timezone the expressions are evaluated in.
    pub timezone: String,
    pub reminder_sweep: String,
    pub subscription_poll: String,
    pub weekly_digest: String,
    pub day_before: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "UTC".into(),
            reminder_sweep: "* * * * *".into(),
            subscription_poll: "0 */6 * * *".into(),
            weekly_digest: "0 12 * * Mon".into(),
            day_before: "0 17 * * *".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// IANA timezone for printed times. Query windows stay in UTC.
    pub display_timezone: String,
    pub digest_window_days: i64,
    pub digest_fetch_limit: usize,
    pub digest_display_limit: usize,
    pub day_before_limit: usize,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            display_timezone: "UTC".into(),
            digest_window_days: 7,
            digest_fetch_limit: 20,
            digest_display_limit: 15,
            day_before_limit: 50,
        }
    }
}

impl NotificationsConfig {
    pub fn display_tz(&self) -> Result<Tz> {
        parse_tz("notifications.display_timezone", &self.display_timezone)
    }
}

fn parse_tz(field: &str, name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::invalid(field, format!("unknown timezone: {name}")))
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MedbotConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fetch.max_bytes, 2 * 1024 * 1024);
        assert_eq!(config.scheduler.subscription_poll, "0 */6 * * *");
        assert!(config.discord.token.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: MedbotConfig = toml::from_str(
            r#"
            [discord]
            token = "bot-token"

            [notifications]
            display_timezone = "America/Chicago"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.discord.token.as_ref().unwrap().expose_secret(),
            "bot-token"
        );
        assert_eq!(config.notifications.digest_fetch_limit, 20);
        assert_eq!(config.notifications.display_tz().unwrap(), Tz::America__Chicago);
        config.validate().unwrap();
    }

    #[test]
    fn token_is_redacted_in_debug() {
        let config: MedbotConfig = toml::from_str("[discord]\ntoken = \"hunter2\"").unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = MedbotConfig::default();
        config.scheduler.timezone = "Nowhere/Special".into();
        assert!(matches!(config.validate(), Err(Error::Invalid { .. })));

        let mut config = MedbotConfig::default();
        config.notifications.digest_display_limit = 50;
        assert!(config.validate().is_err());
    }
}
