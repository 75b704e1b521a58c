//! Calendar operations behind the admin commands: manual entry, bulk import,
//! upcoming listings, and personal schedules.

use std::sync::Arc;

use {
    chrono::{DateTime, Duration, Utc},
    serde::Serialize,
    tracing::info,
};

use crate::{
    Error, Result,
    directory::GroupDirectory,
    ics,
    scope::resolve_scope_in,
    store::CalendarStore,
    text::{default_end, is_upcoming, matches_filter, sanitize_year_key},
    types::{
        Audience, Bucket, CalendarEvent, EventSource, NewEvent, ParsedEvent, SubscriptionScope,
    },
};

pub const DEFAULT_UPCOMING_COUNT: usize = 5;

/// All-day events that began this far back can still be in progress.
const UPCOMING_LOOKBACK_DAYS: i64 = 14;
const UPCOMING_SCAN_LIMIT: usize = 500;

/// A single hand-entered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualEvent {
    pub guild_id: String,
    pub year_key: String,
    pub year_label: Option<String>,
    pub audience: Audience,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub location: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
}

/// Target of a bulk ICS upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    pub guild_id: String,
    pub year_key: String,
    pub year_label: Option<String>,
    pub scope: SubscriptionScope,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub year_key: String,
    /// Each replaced bucket with the number of events now in it.
    pub buckets: Vec<(Audience, usize)>,
}

impl ImportSummary {
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|(_, n)| n).sum()
    }
}

pub struct CalendarService {
    store: Arc<dyn CalendarStore>,
    directory: Arc<dyn GroupDirectory>,
}

impl CalendarService {
    pub fn new(store: Arc<dyn CalendarStore>, directory: Arc<dyn GroupDirectory>) -> Self {
        Self { store, directory }
    }

    /// Store one `manual` event. A missing end defaults to one day (all-day)
    /// or one hour after the start.
    pub async fn add_manual_event(&self, input: ManualEvent) -> Result<i64> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(Error::invalid_input("title must not be empty"));
        }
        let end = input
            .end
            .unwrap_or_else(|| default_end(input.start, input.all_day));
        if end < input.start {
            return Err(Error::invalid_input("end must not be before start"));
        }

        let year_key = sanitize_year_key(&input.year_key);
        let year_label = self.resolve_label(&input.guild_id, &year_key, input.year_label).await?;
        let event = NewEvent {
            guild_id: input.guild_id,
            year_key,
            year_label,
            source: EventSource::Manual,
            audience: input.audience,
            details: ParsedEvent {
                title: title.to_string(),
                uid: None,
                start: input.start,
                end: Some(end),
                all_day: input.all_day,
                location: input.location.filter(|s| !s.trim().is_empty()),
                description: input.description.filter(|s| !s.trim().is_empty()),
                categories: input.categories,
            },
        };
        let id = self.store.insert_event(&event).await?;
        info!(guild_id = %event.guild_id, event_id = id, title = %event.details.title, "calendar event added");
        Ok(id)
    }

    /// Replace bucket contents from an uploaded ICS file. With `auto` scope each
    /// event is resolved on its own and every resulting bucket is replaced.
    ///
    /// A file with no usable events is rejected rather than emptying a bucket.
    pub async fn import_ics(&self, target: ImportTarget, raw: &str) -> Result<ImportSummary> {
        let parsed = ics::parse_events(raw);
        if parsed.is_empty() {
            return Err(Error::invalid_input("no events found in calendar file"));
        }

        let year_key = sanitize_year_key(&target.year_key);
        let year_label = self
            .resolve_label(&target.guild_id, &year_key, target.year_label)
            .await?;

        let mut grouped: Vec<(Audience, Vec<ParsedEvent>)> = Vec::new();
        match target.scope {
            SubscriptionScope::Fixed(audience) => grouped.push((audience, parsed)),
            SubscriptionScope::Auto => {
                let groups = self.directory.active_groups(&target.guild_id).await?;
                for event in parsed {
                    let audience = resolve_scope_in(&event.categories, &groups);
                    match grouped.iter_mut().find(|(a, _)| *a == audience) {
                        Some((_, events)) => events.push(event),
                        None => grouped.push((audience, vec![event])),
                    }
                }
            },
        }

        let mut summary = ImportSummary {
            year_key: year_key.clone(),
            buckets: Vec::with_capacity(grouped.len()),
        };
        for (audience, events) in grouped {
            let bucket = Bucket {
                guild_id: target.guild_id.clone(),
                year_key: year_key.clone(),
                year_label: year_label.clone(),
                audience,
            };
            let count = self.store.replace_bucket(&bucket, &events).await?;
            summary.buckets.push((audience, count));
        }

        info!(
            guild_id = %target.guild_id,
            year_key = %year_key,
            buckets = summary.buckets.len(),
            count = summary.total(),
            "calendar imported"
        );
        Ok(summary)
    }

    /// Up to `count` events still upcoming at `now`, optionally limited to one
    /// year and to events matching `filter`.
    pub async fn upcoming(
        &self,
        guild_id: &str,
        year_key: Option<&str>,
        count: usize,
        filter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>> {
        let year_key = year_key.map(sanitize_year_key);
        let from = now - Duration::days(UPCOMING_LOOKBACK_DAYS);
        let candidates = self
            .store
            .events_for_year(guild_id, year_key.as_deref(), from, UPCOMING_SCAN_LIMIT)
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|e| is_upcoming(e, now))
            .filter(|e| filter.is_none_or(|term| matches_filter(e, term)))
            .take(count)
            .collect())
    }

    /// Events a member can see over the next `days` days.
    pub async fn personal_schedule(
        &self,
        guild_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
        days: i64,
        limit: usize,
    ) -> Result<Vec<CalendarEvent>> {
        self.store
            .events_for_member(guild_id, user_id, now, now + Duration::days(days), limit)
            .await
    }

    /// Label shown for a year key, if any events carry one.
    pub async fn year_label(&self, guild_id: &str, year_key: &str) -> Result<Option<String>> {
        self.store
            .year_label(guild_id, &sanitize_year_key(year_key))
            .await
    }

    async fn resolve_label(
        &self,
        guild_id: &str,
        year_key: &str,
        given: Option<String>,
    ) -> Result<String> {
        if let Some(label) = given.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) {
            return Ok(label);
        }
        Ok(self
            .store
            .year_label(guild_id, year_key)
            .await?
            .unwrap_or_else(|| year_key.to_string()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{store::EventStore, store_sqlite::SqliteStore},
        chrono::TimeZone,
    };

    async fn setup() -> (Arc<SqliteStore>, CalendarService) {
        let store = Arc::new(SqliteStore::new("sqlite::memory:").await.unwrap());
        let service = CalendarService::new(store.clone(), store.clone());
        (store, service)
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
    }

    fn manual(title: &str, start: DateTime<Utc>) -> ManualEvent {
        ManualEvent {
            guild_id: "G".into(),
            year_key: "Class of 2027".into(),
            year_label: Some("Class of 2027".into()),
            audience: Audience::University,
            title: title.into(),
            start,
            end: None,
            all_day: false,
            location: None,
            description: None,
            categories: Vec::new(),
        }
    }

    const TWO_EVENTS: &str = "BEGIN:VCALENDAR\r\n\
BEGIN:VEVENT\r\nSUMMARY:Anatomy lab\r\nDTSTART:20250610T130000Z\r\nCATEGORIES:CBI A\r\nEND:VEVENT\r\n\
BEGIN:VEVENT\r\nSUMMARY:Town hall\r\nDTSTART:20250611T170000Z\r\nEND:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[tokio::test]
    async fn manual_event_gets_default_end_and_year() {
        let (store, service) = setup().await;
        service.add_manual_event(manual("Orientation", at(10, 9))).await.unwrap();

        let events = store
            .events_for_year("G", Some("class-of-2027"), at(1, 0), 10)
            .await
            .unwrap();
        assert_eq!(events[0].end, Some(at(10, 10)));
        assert_eq!(events[0].source, EventSource::Manual);

        let mut holiday = manual("Holiday", at(12, 0));
        holiday.all_day = true;
        holiday.year_label = None;
        service.add_manual_event(holiday).await.unwrap();
        let events = store
            .events_for_year("G", Some("class-of-2027"), at(12, 0), 10)
            .await
            .unwrap();
        assert_eq!(events[0].end, Some(at(13, 0)));
        assert_eq!(events[0].year_label, "Class of 2027");
    }

    #[tokio::test]
    async fn manual_event_validation() {
        let (_store, service) = setup().await;
        let mut bad = manual("  ", at(10, 9));
        assert!(service.add_manual_event(bad.clone()).await.is_err());
        bad.title = "Exam".into();
        bad.end = Some(at(9, 9));
        assert!(matches!(
            service.add_manual_event(bad).await,
            Err(Error::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn auto_import_splits_into_buckets() {
        let (store, service) = setup().await;
        let group = store.create_group("G", "cbi-a", "CBI A").await.unwrap();
        let target = ImportTarget {
            guild_id: "G".into(),
            year_key: "2027".into(),
            year_label: None,
            scope: SubscriptionScope::Auto,
        };

        let summary = service.import_ics(target.clone(), TWO_EVENTS).await.unwrap();
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.buckets, vec![
            (Audience::Group(group.id), 1),
            (Audience::University, 1)
        ]);

        // Re-importing the same file replaces rather than duplicates.
        service.import_ics(target, TWO_EVENTS).await.unwrap();
        let events = store.events_for_year("G", Some("2027"), at(1, 0), 10).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn empty_import_is_rejected() {
        let (_store, service) = setup().await;
        let target = ImportTarget {
            guild_id: "G".into(),
            year_key: "2027".into(),
            year_label: None,
            scope: SubscriptionScope::Fixed(Audience::Cohort),
        };
        assert!(
            service
                .import_ics(target, "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn upcoming_applies_filter_and_count() {
        let (_store, service) = setup().await;
        for (title, day) in [("Past", 1), ("Anatomy exam", 10), ("Pharm quiz", 11), ("Anatomy lab", 12)] {
            service.add_manual_event(manual(title, at(day, 9))).await.unwrap();
        }
        let mut spring_break = manual("Break", at(3, 0));
        spring_break.all_day = true;
        spring_break.end = Some(at(9, 0));
        service.add_manual_event(spring_break).await.unwrap();

        let now = at(5, 0);
        let all = service.upcoming("G", None, 10, None, now).await.unwrap();
        let titles: Vec<_> = all.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Break", "Anatomy exam", "Pharm quiz", "Anatomy lab"]);

        let anatomy = service
            .upcoming("G", Some("Class of 2027"), 1, Some("anatomy"), now)
            .await
            .unwrap();
        assert_eq!(anatomy.len(), 1);
        assert_eq!(anatomy[0].title, "Anatomy exam");
    }
}
