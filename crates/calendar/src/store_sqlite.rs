//! SQLite-backed calendar store using sqlx.

use std::collections::HashSet;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::{
        Row, SqliteConnection, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
    tracing::debug,
};

use crate::{
    Error, Result,
    directory::GroupDirectory,
    store::{EventStore, NotificationStore, ReminderStore, SubscriptionStore},
    types::{
        Audience, Bucket, CalendarEvent, CalendarSubscription, DueReminder, EventSource, Group,
        NewEvent, NewSubscription, NotificationChannel, NotificationKind, ParsedEvent,
        SubscriptionScope,
    },
};

const EVENT_COLUMNS: &str = "id, guild_id, year_key, year_label, title, start_at, end_at, \
                             all_day, location, description, categories, source, external_uid, \
                             scope, group_id";

const SUBSCRIPTION_COLUMNS: &str =
    "id, guild_id, url, scope, group_id, year_key, year_label, last_fetched, last_count";

const NOTIFICATION_COLUMNS: &str = "id, guild_id, scope, group_id, channel_id, kind";

/// Keyed on `(guild, external UID)` so re-imports update rows in place and
/// keep their ids (reminders reference them).
const INSERT_EVENT_SQL: &str = "INSERT INTO calendar_events
        (guild_id, year_key, year_label, title, start_at, end_at, all_day, location,
         description, categories, source, external_uid, scope, group_id)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(guild_id, external_uid) WHERE external_uid IS NOT NULL DO UPDATE SET
        year_key = excluded.year_key,
        year_label = excluded.year_label,
        title = excluded.title,
        start_at = excluded.start_at,
        end_at = excluded.end_at,
        all_day = excluded.all_day,
        location = excluded.location,
        description = excluded.description,
        categories = excluded.categories,
        source = excluded.source,
        scope = excluded.scope,
        group_id = excluded.group_id,
        updated_at = CAST(strftime('%s', 'now') AS INTEGER)
     RETURNING id";

/// SQLite persistence for events, subscriptions, notification targets,
/// reminders, and the group directory tables.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect with a small default pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, 5).await
    }

    /// Connect with at most `max_connections` and run migrations.
    ///
    /// In-memory databases are pinned to one long-lived connection, since each
    /// SQLite connection would otherwise see its own empty database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };
        let pool = options.connect(database_url).await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create an active group. `name` is stored as given and should already be
    /// a slug.
    pub async fn create_group(&self, guild_id: &str, name: &str, label: &str) -> Result<Group> {
        let row = sqlx::query(
            "INSERT INTO study_groups (guild_id, name, label) VALUES (?, ?, ?)
             RETURNING id, guild_id, name, label, active",
        )
        .bind(guild_id)
        .bind(name)
        .bind(label)
        .fetch_one(&self.pool)
        .await?;
        group_from_row(&row)
    }

    pub async fn set_group_active(&self, group_id: i64, active: bool) -> Result<()> {
        let result = sqlx::query("UPDATE study_groups SET active = ? WHERE id = ?")
            .bind(active)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::message(format!("group not found: {group_id}")));
        }
        Ok(())
    }

    pub async fn add_group_member(&self, group_id: i64, user_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?, ?)")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_group_member(&self, group_id: i64, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn insert_event(&self, event: &NewEvent) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        write_event(&mut *conn, event).await
    }

    async fn replace_bucket(&self, bucket: &Bucket, events: &[ParsedEvent]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query(
            "DELETE FROM calendar_events
             WHERE guild_id = ? AND year_key = ? AND scope = ? AND group_id IS ?",
        )
        .bind(&bucket.guild_id)
        .bind(&bucket.year_key)
        .bind(bucket.audience.scope().as_str())
        .bind(bucket.audience.group_id())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // Repeated UIDs in one batch collapse onto a single row.
        let mut written = HashSet::new();
        for details in events {
            let event = NewEvent {
                guild_id: bucket.guild_id.clone(),
                year_key: bucket.year_key.clone(),
                year_label: bucket.year_label.clone(),
                source: EventSource::Ics,
                audience: bucket.audience,
                details: details.clone(),
            };
            written.insert(write_event(&mut *tx, &event).await?);
        }

        tx.commit().await?;
        debug!(
            guild_id = %bucket.guild_id,
            year_key = %bucket.year_key,
            audience = %bucket.audience,
            removed,
            inserted = written.len(),
            "replaced calendar bucket"
        );
        Ok(written.len())
    }

    async fn upsert_by_uid(&self, events: &[NewEvent]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = HashSet::new();
        let mut skipped = 0;
        for event in events {
            if event.details.uid.is_none() {
                skipped += 1;
                continue;
            }
            written.insert(write_event(&mut *tx, event).await?);
        }
        tx.commit().await?;

        if skipped > 0 {
            debug!(skipped, "skipped events without a UID");
        }
        Ok(written.len())
    }

    async fn events_for_year(
        &self,
        guild_id: &str,
        year_key: Option<&str>,
        from: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM calendar_events
             WHERE guild_id = ? AND (? IS NULL OR year_key = ?) AND start_at >= ?
             ORDER BY start_at ASC, id ASC
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(guild_id)
            .bind(year_key)
            .bind(year_key)
            .bind(from.timestamp())
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn events_in_window(
        &self,
        guild_id: &str,
        audience: Audience,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM calendar_events
             WHERE guild_id = ? AND scope = ? AND group_id IS ?
               AND start_at >= ? AND start_at <= ?
             ORDER BY start_at ASC, id ASC
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(guild_id)
            .bind(audience.scope().as_str())
            .bind(audience.group_id())
            .bind(start.timestamp())
            .bind(end.timestamp())
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn group_events_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit_per_group: usize,
    ) -> Result<Vec<CalendarEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM (
                 SELECT *, ROW_NUMBER() OVER (
                     PARTITION BY guild_id, group_id ORDER BY start_at ASC, id ASC
                 ) AS rank_in_group
                 FROM calendar_events
                 WHERE scope = 'group' AND start_at >= ? AND start_at <= ?
             )
             WHERE rank_in_group <= ?
             ORDER BY guild_id ASC, group_id ASC, start_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(start.timestamp())
            .bind(end.timestamp())
            .bind(sql_limit(limit_per_group))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn events_for_member(
        &self,
        guild_id: &str,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM calendar_events
             WHERE guild_id = ?
               AND start_at >= ? AND start_at <= ?
               AND (scope IN ('university', 'cohort')
                    OR (scope = 'group' AND group_id IN (
                        SELECT g.id FROM study_groups g
                        JOIN group_members m ON m.group_id = g.id
                        WHERE g.guild_id = ? AND g.active = 1 AND m.user_id = ?)))
             ORDER BY start_at ASC, id ASC
             LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(guild_id)
            .bind(start.timestamp())
            .bind(end.timestamp())
            .bind(guild_id)
            .bind(user_id)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn year_label(&self, guild_id: &str, year_key: &str) -> Result<Option<String>> {
        let label = sqlx::query_scalar(
            "SELECT year_label FROM calendar_events
             WHERE guild_id = ? AND year_key = ?
             ORDER BY updated_at DESC, id DESC
             LIMIT 1",
        )
        .bind(guild_id)
        .bind(year_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(label)
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn subscribe(&self, subscription: &NewSubscription) -> Result<CalendarSubscription> {
        let sql = format!(
            "INSERT INTO calendar_subscriptions (guild_id, url, scope, group_id, year_key, year_label)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(guild_id, url) DO UPDATE SET
                scope = excluded.scope,
                group_id = excluded.group_id,
                year_key = excluded.year_key,
                year_label = excluded.year_label
             RETURNING {SUBSCRIPTION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&subscription.guild_id)
            .bind(&subscription.url)
            .bind(subscription.scope.as_str())
            .bind(subscription.scope.group_id())
            .bind(&subscription.year_key)
            .bind(&subscription.year_label)
            .fetch_one(&self.pool)
            .await?;
        subscription_from_row(&row)
    }

    async fn subscriptions(&self, guild_id: &str) -> Result<Vec<CalendarSubscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM calendar_subscriptions
             WHERE guild_id = ?
             ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(guild_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn unsubscribe(&self, guild_id: &str, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM calendar_subscriptions WHERE guild_id = ? AND url = ?")
            .bind(guild_id)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn subscribed_guilds(&self) -> Result<Vec<String>> {
        let guilds = sqlx::query_scalar(
            "SELECT DISTINCT guild_id FROM calendar_subscriptions ORDER BY guild_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(guilds)
    }

    async fn record_fetch(&self, id: i64, fetched_at: DateTime<Utc>, count: usize) -> Result<()> {
        let result = sqlx::query(
            "UPDATE calendar_subscriptions SET last_fetched = ?, last_count = ? WHERE id = ?",
        )
        .bind(fetched_at.timestamp())
        .bind(sql_limit(count))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::message(format!("subscription not found: {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn set_notification_channel(
        &self,
        guild_id: &str,
        audience: Audience,
        kind: NotificationKind,
        channel_id: &str,
    ) -> Result<NotificationChannel> {
        // The uniqueness key is an expression index, which an upsert cannot target.
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM notification_channels
             WHERE guild_id = ? AND scope = ? AND group_id IS ? AND kind = ?",
        )
        .bind(guild_id)
        .bind(audience.scope().as_str())
        .bind(audience.group_id())
        .bind(kind.as_str())
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            "INSERT INTO notification_channels (guild_id, scope, group_id, channel_id, kind)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {NOTIFICATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(guild_id)
            .bind(audience.scope().as_str())
            .bind(audience.group_id())
            .bind(channel_id)
            .bind(kind.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let channel = notification_from_row(&row)?;
        tx.commit().await?;
        Ok(channel)
    }

    async fn notification_channels(
        &self,
        kind: NotificationKind,
    ) -> Result<Vec<NotificationChannel>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification_channels
             WHERE kind = ?
             ORDER BY guild_id, id"
        );
        let rows = sqlx::query(&sql)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn guild_notification_channels(
        &self,
        guild_id: &str,
        kind: Option<NotificationKind>,
    ) -> Result<Vec<NotificationChannel>> {
        let kind = kind.map(NotificationKind::as_str);
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification_channels
             WHERE guild_id = ? AND (? IS NULL OR kind = ?)
             ORDER BY kind, id"
        );
        let rows = sqlx::query(&sql)
            .bind(guild_id)
            .bind(kind)
            .bind(kind)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn remove_notification_channel(
        &self,
        guild_id: &str,
        audience: Audience,
        kind: NotificationKind,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM notification_channels
             WHERE guild_id = ? AND scope = ? AND group_id IS ? AND kind = ?",
        )
        .bind(guild_id)
        .bind(audience.scope().as_str())
        .bind(audience.group_id())
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ReminderStore for SqliteStore {
    async fn create_reminder(
        &self,
        event_id: i64,
        remind_at: DateTime<Utc>,
        channel_id: &str,
    ) -> Result<i64> {
        let id = sqlx::query_scalar(
            "INSERT INTO reminders (event_id, remind_at, channel_id) VALUES (?, ?, ?)
             RETURNING id",
        )
        .bind(event_id)
        .bind(remind_at.timestamp())
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<DueReminder>> {
        let rows = sqlx::query(
            "SELECT r.id, r.event_id, r.channel_id, r.remind_at,
                    e.title, e.start_at, e.all_day
             FROM reminders r
             JOIN calendar_events e ON e.id = r.event_id
             WHERE r.sent = 0 AND r.remind_at <= ?
             ORDER BY r.remind_at ASC, r.id ASC",
        )
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DueReminder {
                    id: row.try_get("id")?,
                    event_id: row.try_get("event_id")?,
                    channel_id: row.try_get("channel_id")?,
                    remind_at: from_unix(row.try_get("remind_at")?)?,
                    event_title: row.try_get("title")?,
                    event_start: from_unix(row.try_get("start_at")?)?,
                    event_all_day: row.try_get("all_day")?,
                })
            })
            .collect()
    }

    async fn mark_reminder_sent(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE reminders SET sent = 1 WHERE id = ? AND sent = 0")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl GroupDirectory for SqliteStore {
    async fn active_groups(&self, guild_id: &str) -> Result<Vec<Group>> {
        let rows = sqlx::query(
            "SELECT id, guild_id, name, label, active FROM study_groups
             WHERE guild_id = ? AND active = 1
             ORDER BY name",
        )
        .bind(guild_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }

    async fn group_by_slug(&self, guild_id: &str, slug: &str) -> Result<Option<Group>> {
        let row = sqlx::query(
            "SELECT id, guild_id, name, label, active FROM study_groups
             WHERE guild_id = ? AND name = ? AND active = 1",
        )
        .bind(guild_id)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(group_from_row).transpose()
    }

    async fn group_members(&self, group_id: i64) -> Result<Vec<String>> {
        let members = sqlx::query_scalar(
            "SELECT user_id FROM group_members WHERE group_id = ? ORDER BY added_at, user_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    async fn member_groups(&self, guild_id: &str, user_id: &str) -> Result<Vec<Group>> {
        let rows = sqlx::query(
            "SELECT g.id, g.guild_id, g.name, g.label, g.active FROM study_groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE g.guild_id = ? AND g.active = 1 AND m.user_id = ?
             ORDER BY g.name",
        )
        .bind(guild_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(group_from_row).collect()
    }
}

async fn write_event(conn: &mut SqliteConnection, event: &NewEvent) -> Result<i64> {
    let details = &event.details;
    let categories = if details.categories.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&details.categories)?)
    };
    let id = sqlx::query_scalar(INSERT_EVENT_SQL)
        .bind(&event.guild_id)
        .bind(&event.year_key)
        .bind(&event.year_label)
        .bind(&details.title)
        .bind(details.start.timestamp())
        .bind(details.end.map(|end| end.timestamp()))
        .bind(details.all_day)
        .bind(&details.location)
        .bind(&details.description)
        .bind(categories)
        .bind(event.source.as_str())
        .bind(&details.uid)
        .bind(event.audience.scope().as_str())
        .bind(event.audience.group_id())
        .fetch_one(conn)
        .await?;
    Ok(id)
}

fn event_from_row(row: &SqliteRow) -> Result<CalendarEvent> {
    let scope: String = row.try_get("scope")?;
    let source: String = row.try_get("source")?;
    let categories: Option<String> = row.try_get("categories")?;
    let end_at: Option<i64> = row.try_get("end_at")?;
    Ok(CalendarEvent {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        year_key: row.try_get("year_key")?,
        year_label: row.try_get("year_label")?,
        title: row.try_get("title")?,
        start: from_unix(row.try_get("start_at")?)?,
        end: end_at.map(from_unix).transpose()?,
        all_day: row.try_get("all_day")?,
        location: row.try_get("location")?,
        description: row.try_get("description")?,
        categories: match categories {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        },
        source: source.parse()?,
        external_uid: row.try_get("external_uid")?,
        audience: Audience::from_parts(scope.parse()?, row.try_get("group_id")?)?,
    })
}

fn subscription_from_row(row: &SqliteRow) -> Result<CalendarSubscription> {
    let scope: String = row.try_get("scope")?;
    let last_fetched: Option<i64> = row.try_get("last_fetched")?;
    Ok(CalendarSubscription {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        url: row.try_get("url")?,
        scope: SubscriptionScope::from_parts(&scope, row.try_get("group_id")?)?,
        year_key: row.try_get("year_key")?,
        year_label: row.try_get("year_label")?,
        last_fetched: last_fetched.map(from_unix).transpose()?,
        last_count: row.try_get("last_count")?,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<NotificationChannel> {
    let scope: String = row.try_get("scope")?;
    let kind: String = row.try_get("kind")?;
    Ok(NotificationChannel {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        audience: Audience::from_parts(scope.parse()?, row.try_get("group_id")?)?,
        channel_id: row.try_get("channel_id")?,
        kind: kind.parse()?,
    })
}

fn group_from_row(row: &SqliteRow) -> Result<Group> {
    Ok(Group {
        id: row.try_get("id")?,
        guild_id: row.try_get("guild_id")?,
        name: row.try_get("name")?,
        label: row.try_get("label")?,
        active: row.try_get("active")?,
    })
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::message(format!("timestamp out of range: {secs}")))
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
