//! Wiring shared by the bot and the admin commands: store, fetcher, poller,
//! job settings.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    medbot_calendar::{
        fetch::HttpFetcher, poller::SubscriptionPoller, service::CalendarService,
        store_sqlite::SqliteStore,
    },
    medbot_config::MedbotConfig,
    medbot_cron::{JobKind, JobSchedule, JobSpec, NotificationSettings},
    tracing::debug,
};

pub struct AppContext {
    pub store: Arc<SqliteStore>,
    pub service: CalendarService,
    pub poller: Arc<SubscriptionPoller>,
}

impl AppContext {
    /// Open the database (running migrations) and build the calendar services.
    pub async fn open(config: &MedbotConfig) -> anyhow::Result<Self> {
        let store = Arc::new(
            SqliteStore::connect(&config.database.url, config.database.max_connections)
                .await
                .with_context(|| format!("failed to open database {}", config.database.url))?,
        );
        debug!(url = %config.database.url, "database ready");

        let fetcher = Arc::new(
            HttpFetcher::new(
                config.fetch.max_bytes,
                config.fetch.max_redirects,
                Duration::from_secs(config.fetch.timeout_seconds),
            )
            .context("failed to build HTTP client")?,
        );
        let poller = Arc::new(SubscriptionPoller::new(
            store.clone(),
            store.clone(),
            fetcher,
        ));
        let service = CalendarService::new(store.clone(), store.clone());

        Ok(Self {
            store,
            service,
            poller,
        })
    }
}

pub fn notification_settings(config: &MedbotConfig) -> anyhow::Result<NotificationSettings> {
    let n = &config.notifications;
    Ok(NotificationSettings {
        display_timezone: n.display_tz()?,
        digest_window_days: n.digest_window_days,
        digest_fetch_limit: n.digest_fetch_limit,
        digest_display_limit: n.digest_display_limit,
        day_before_limit: n.day_before_limit,
    })
}

/// One cron job spec per notification job, evaluated in `scheduler.timezone`.
pub fn job_specs(config: &MedbotConfig) -> Vec<JobSpec> {
    let s = &config.scheduler;
    JobKind::ALL
        .into_iter()
        .map(|kind| {
            let expr = match kind {
                JobKind::ReminderSweep => &s.reminder_sweep,
                JobKind::SubscriptionPoll => &s.subscription_poll,
                JobKind::WeeklyDigest => &s.weekly_digest,
                JobKind::DayBeforeReminder => &s.day_before,
            };
            JobSpec {
                kind,
                schedule: JobSchedule::Cron {
                    expr: expr.clone(),
                    tz: Some(s.timezone.clone()),
                },
            }
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono_tz::Tz};

    #[test]
    fn job_specs_follow_config() {
        let mut config = MedbotConfig::default();
        config.scheduler.timezone = "America/New_York".into();
        config.scheduler.weekly_digest = "30 8 * * Sun".into();

        let specs = job_specs(&config);
        assert_eq!(specs.len(), 4);
        let digest = specs
            .iter()
            .find(|s| s.kind == JobKind::WeeklyDigest)
            .unwrap();
        assert_eq!(digest.schedule, JobSchedule::Cron {
            expr: "30 8 * * Sun".into(),
            tz: Some("America/New_York".into()),
        });
    }

    #[test]
    fn settings_carry_display_timezone() {
        let mut config = MedbotConfig::default();
        config.notifications.display_timezone = "Europe/Dublin".into();
        config.notifications.digest_display_limit = 10;
        let settings = notification_settings(&config).unwrap();
        assert_eq!(settings.display_timezone, Tz::Europe__Dublin);
        assert_eq!(settings.digest_display_limit, 10);

        config.notifications.display_timezone = "Mars/Olympus".into();
        assert!(notification_settings(&config).is_err());
    }

    #[tokio::test]
    async fn opens_in_memory_database() {
        let mut config = MedbotConfig::default();
        config.database.url = "sqlite::memory:".into();
        let ctx = AppContext::open(&config).await.unwrap();
        let summaries = ctx.poller.poll_all().await.unwrap();
        assert!(summaries.is_empty());
    }
}
