//! Calendar core: ICS parsing, audience scope resolution, event storage,
//! and subscription polling.
//!
//! Events are grouped into buckets by guild, year, and audience. Bulk uploads
//! replace a bucket wholesale; subscription feeds are merged by external UID.

pub mod directory;
pub mod error;
pub mod fetch;
pub mod ics;
pub mod poller;
pub mod scope;
pub mod service;
pub mod store;
pub mod store_sqlite;
pub mod text;
pub mod types;

pub use error::{Error, Result};

/// Run database migrations for the calendar and directory tables.
///
/// This creates the `calendar_events`, `calendar_subscriptions`,
/// `notification_channels`, `reminders`, `study_groups`, and `group_members`
/// tables. Should be called at application startup when using a shared pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
