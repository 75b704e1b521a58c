//! The four notification jobs run by the scheduler.
//!
//! Every job walks its units (reminders, subscriptions, channels, members)
//! one at a time. A failing unit is logged and counted; it never stops the
//! rest of the pass.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    chrono::{DateTime, Duration, Utc},
    chrono_tz::Tz,
    medbot_calendar::{
        directory::GroupDirectory,
        poller::SubscriptionPoller,
        store::CalendarStore,
        types::{Audience, CalendarEvent, NotificationChannel, NotificationKind},
    },
    medbot_channels::MessageSink,
    tracing::{debug, warn},
};

use crate::{
    Result, render,
    service::JobRunner,
    types::{JobKind, JobReport},
};

/// Tunables for digest and reminder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    /// Timezone used to print event times. Windows are always computed in UTC.
    pub display_timezone: Tz,
    pub digest_window_days: i64,
    pub digest_fetch_limit: usize,
    pub digest_display_limit: usize,
    pub day_before_limit: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            display_timezone: Tz::UTC,
            digest_window_days: 7,
            digest_fetch_limit: 20,
            digest_display_limit: 15,
            day_before_limit: 50,
        }
    }
}

pub struct NotificationJobs {
    store: Arc<dyn CalendarStore>,
    directory: Arc<dyn GroupDirectory>,
    poller: Arc<SubscriptionPoller>,
    sink: Arc<dyn MessageSink>,
    settings: NotificationSettings,
}

impl NotificationJobs {
    pub fn new(
        store: Arc<dyn CalendarStore>,
        directory: Arc<dyn GroupDirectory>,
        poller: Arc<SubscriptionPoller>,
        sink: Arc<dyn MessageSink>,
        settings: NotificationSettings,
    ) -> Self {
        Self {
            store,
            directory,
            poller,
            sink,
            settings,
        }
    }

    /// Fire due reminders. Each is marked sent before delivery is attempted,
    /// so an overlapping sweep that loses the flip skips it.
    pub async fn reminder_sweep(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();
        for reminder in self.store.due_reminders(now).await? {
            match self.store.mark_reminder_sent(reminder.id).await {
                Ok(true) => {},
                Ok(false) => {
                    debug!(reminder_id = reminder.id, "reminder already claimed");
                    report.skipped += 1;
                    continue;
                },
                Err(e) => {
                    warn!(reminder_id = reminder.id, error = %e, "failed to mark reminder sent");
                    report.failed += 1;
                    continue;
                },
            }

            let text = render::reminder_message(&reminder, self.settings.display_timezone);
            match self.sink.post_to_channel(&reminder.channel_id, &text).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        reminder_id = reminder.id,
                        channel_id = %reminder.channel_id,
                        error = %e,
                        "reminder delivery failed"
                    );
                    report.failed += 1;
                },
            }
        }
        Ok(report)
    }

    /// Poll every guild's subscriptions.
    pub async fn subscription_poll(&self) -> Result<JobReport> {
        let mut report = JobReport::default();
        for summary in self.poller.poll_all().await? {
            let failed = summary.failed();
            report.delivered += summary.reports.len() - failed;
            report.failed += failed;
        }
        Ok(report)
    }

    /// Post the week ahead to every digest channel that has events.
    pub async fn weekly_digest(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let end = now + Duration::days(self.settings.digest_window_days);
        let mut report = JobReport::default();

        for channel in self.store.notification_channels(NotificationKind::Digest).await? {
            let events = match self
                .store
                .events_in_window(
                    &channel.guild_id,
                    channel.audience,
                    now,
                    end,
                    self.settings.digest_fetch_limit,
                )
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    warn!(guild_id = %channel.guild_id, channel_id = %channel.channel_id, error = %e, "digest query failed");
                    report.failed += 1;
                    continue;
                },
            };
            if events.is_empty() {
                report.skipped += 1;
                continue;
            }

            let heading = self
                .audience_heading(&channel.guild_id, channel.audience)
                .await;
            let text = render::digest_message(
                &heading,
                &events,
                self.settings.digest_display_limit,
                self.settings.display_timezone,
            );
            self.post(&channel, &text, &mut report).await;
        }
        Ok(report)
    }

    /// Announce tomorrow's (UTC) events. University and cohort channels get one
    /// aggregated post. Every group with an event tomorrow has its current
    /// members DMed, whether or not a channel is registered for it.
    pub async fn day_before(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let (start, end) = tomorrow_window(now);
        let mut report = JobReport::default();

        for channel in self
            .store
            .notification_channels(NotificationKind::Reminder)
            .await?
        {
            if let Audience::Group(group_id) = channel.audience {
                debug!(guild_id = %channel.guild_id, group_id, channel_id = %channel.channel_id, "group reminders go to members, ignoring channel");
                continue;
            }
            let events = match self
                .store
                .events_in_window(
                    &channel.guild_id,
                    channel.audience,
                    start,
                    end,
                    self.settings.day_before_limit,
                )
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    warn!(guild_id = %channel.guild_id, audience = %channel.audience, error = %e, "day-before query failed");
                    report.failed += 1;
                    continue;
                },
            };
            if events.is_empty() {
                report.skipped += 1;
                continue;
            }

            let heading = self
                .audience_heading(&channel.guild_id, channel.audience)
                .await;
            let text =
                render::day_before_message(&heading, &events, self.settings.display_timezone);
            self.post(&channel, &text, &mut report).await;
        }

        report += self.day_before_groups(start, end).await;
        Ok(report)
    }

    async fn day_before_groups(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> JobReport {
        let mut report = JobReport::default();
        let events = match self
            .store
            .group_events_in_window(start, end, self.settings.day_before_limit)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "day-before group query failed");
                report.failed += 1;
                return report;
            },
        };

        let mut by_group: BTreeMap<(String, i64), Vec<CalendarEvent>> = BTreeMap::new();
        for event in events {
            if let Audience::Group(group_id) = event.audience {
                by_group
                    .entry((event.guild_id.clone(), group_id))
                    .or_default()
                    .push(event);
            }
        }

        for ((guild_id, group_id), events) in by_group {
            let heading = self
                .audience_heading(&guild_id, Audience::Group(group_id))
                .await;
            let text =
                render::day_before_message(&heading, &events, self.settings.display_timezone);
            report += self.message_members(&guild_id, group_id, &text).await;
        }
        report
    }

    /// DM every current member of a group. Membership is read at send time.
    async fn message_members(&self, guild_id: &str, group_id: i64, text: &str) -> JobReport {
        let mut report = JobReport::default();
        let members = match self.directory.group_members(group_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!(guild_id, group_id, error = %e, "failed to load group members");
                report.failed += 1;
                return report;
            },
        };
        for user_id in members {
            match self.sink.direct_message(&user_id, text).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(guild_id, group_id, user_id = %user_id, error = %e, "member DM failed");
                    report.failed += 1;
                },
            }
        }
        report
    }

    async fn post(&self, channel: &NotificationChannel, text: &str, report: &mut JobReport) {
        match self.sink.post_to_channel(&channel.channel_id, text).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!(
                    guild_id = %channel.guild_id,
                    channel_id = %channel.channel_id,
                    error = %e,
                    "notification post failed"
                );
                report.failed += 1;
            },
        }
    }

    async fn audience_heading(&self, guild_id: &str, audience: Audience) -> String {
        match audience {
            Audience::University => "University".to_string(),
            Audience::Cohort => "Cohort".to_string(),
            Audience::Group(id) => self
                .directory
                .active_groups(guild_id)
                .await
                .ok()
                .and_then(|groups| groups.into_iter().find(|g| g.id == id))
                .map_or_else(|| format!("Group {id}"), |g| g.label),
        }
    }
}

#[async_trait]
impl JobRunner for NotificationJobs {
    async fn run(&self, kind: JobKind) -> Result<JobReport> {
        match kind {
            JobKind::ReminderSweep => self.reminder_sweep(Utc::now()).await,
            JobKind::SubscriptionPoll => self.subscription_poll().await,
            JobKind::WeeklyDigest => self.weekly_digest(Utc::now()).await,
            JobKind::DayBeforeReminder => self.day_before(Utc::now()).await,
        }
    }
}

/// `[00:00:00, 23:59:59]` UTC of the day after `now`.
pub fn tomorrow_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = (now.date_naive() + Duration::days(1))
        .and_time(chrono::NaiveTime::MIN)
        .and_utc();
    (start, start + Duration::days(1) - Duration::seconds(1))
}
