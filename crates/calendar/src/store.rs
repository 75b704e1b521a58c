//! Persistence contracts for calendar data.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Result,
    types::{
        Audience, Bucket, CalendarEvent, CalendarSubscription, DueReminder, NewEvent,
        NewSubscription, NotificationChannel, NotificationKind, ParsedEvent,
    },
};

/// Calendar event persistence.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a single event and return its id.
    async fn insert_event(&self, event: &NewEvent) -> Result<i64>;

    /// Atomically delete every event in `bucket` and insert `events` in its place.
    ///
    /// UIDs are unique per guild: an event whose UID is already stored in
    /// another bucket of the guild is moved into this one. Returns the number
    /// of distinct rows written.
    async fn replace_bucket(&self, bucket: &Bucket, events: &[ParsedEvent]) -> Result<usize>;

    /// Insert or update events keyed by `(guild, external UID)` in one
    /// transaction. Events without a UID are skipped. Returns distinct rows written.
    async fn upsert_by_uid(&self, events: &[NewEvent]) -> Result<usize>;

    /// Events of a guild (optionally one year) starting at or after `from`.
    async fn events_for_year(
        &self,
        guild_id: &str,
        year_key: Option<&str>,
        from: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>>;

    /// Events for one audience starting within `[start, end]`.
    async fn events_in_window(
        &self,
        guild_id: &str,
        audience: Audience,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>>;

    /// Group-scoped events of every guild starting within `[start, end]`,
    /// ordered by guild, group, then start time. At most `limit_per_group`
    /// events are returned for each group.
    async fn group_events_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit_per_group: usize,
    ) -> Result<Vec<CalendarEvent>>;

    /// Personal schedule: university and cohort events plus group events for
    /// every active group the user belongs to, starting within `[start, end]`.
    async fn events_for_member(
        &self,
        guild_id: &str,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>>;

    /// Display label stored for a year key.
    async fn year_label(&self, guild_id: &str, year_key: &str) -> Result<Option<String>>;
}

/// Registered ICS feeds.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Create a subscription, or replace the settings of an existing one for
    /// the same guild and URL.
    async fn subscribe(&self, subscription: &NewSubscription) -> Result<CalendarSubscription>;
    async fn subscriptions(&self, guild_id: &str) -> Result<Vec<CalendarSubscription>>;
    /// Returns `false` when nothing matched.
    async fn unsubscribe(&self, guild_id: &str, url: &str) -> Result<bool>;
    /// Guilds with at least one subscription.
    async fn subscribed_guilds(&self) -> Result<Vec<String>>;
    async fn record_fetch(&self, id: i64, fetched_at: DateTime<Utc>, count: usize) -> Result<()>;
}

/// Digest and reminder destinations.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Register a destination, replacing any existing one for the same
    /// `(guild, audience, kind)`.
    async fn set_notification_channel(
        &self,
        guild_id: &str,
        audience: Audience,
        kind: NotificationKind,
        channel_id: &str,
    ) -> Result<NotificationChannel>;

    /// Every destination of `kind`, across guilds.
    async fn notification_channels(&self, kind: NotificationKind)
    -> Result<Vec<NotificationChannel>>;

    async fn guild_notification_channels(
        &self,
        guild_id: &str,
        kind: Option<NotificationKind>,
    ) -> Result<Vec<NotificationChannel>>;

    async fn remove_notification_channel(
        &self,
        guild_id: &str,
        audience: Audience,
        kind: NotificationKind,
    ) -> Result<bool>;
}

/// Per-event reminders.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn create_reminder(
        &self,
        event_id: i64,
        remind_at: DateTime<Utc>,
        channel_id: &str,
    ) -> Result<i64>;

    /// Unsent reminders with a fire time at or before `now`, oldest first.
    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<DueReminder>>;

    /// Flip `sent` from false to true. Returns `true` only for the caller that
    /// performed the flip.
    async fn mark_reminder_sent(&self, id: i64) -> Result<bool>;
}

/// Everything the poller and the notification jobs need from storage.
pub trait CalendarStore: EventStore + SubscriptionStore + NotificationStore + ReminderStore {}

impl<T> CalendarStore for T where T: EventStore + SubscriptionStore + NotificationStore + ReminderStore
{}
