//! Message text for reminders, digests, and day-before notices.

use {
    chrono_tz::Tz,
    medbot_calendar::{
        text::format_when,
        types::{CalendarEvent, DueReminder},
    },
};

pub fn reminder_message(reminder: &DueReminder, tz: Tz) -> String {
    format!(
        "🔔 Reminder: **{}** starts {}",
        reminder.event_title,
        format_when(reminder.event_start, reminder.event_all_day, tz)
    )
}

/// Week-ahead summary. Shows at most `display_limit` events and notes how
/// many more were found.
pub fn digest_message(
    heading: &str,
    events: &[CalendarEvent],
    display_limit: usize,
    tz: Tz,
) -> String {
    let mut out = format!("📅 **{heading}: the week ahead**");
    for event in events.iter().take(display_limit) {
        out.push('\n');
        out.push_str(&event_line(event, tz));
    }
    if events.len() > display_limit {
        out.push_str(&format!("\n…and {} more", events.len() - display_limit));
    }
    out
}

pub fn day_before_message(heading: &str, events: &[CalendarEvent], tz: Tz) -> String {
    let mut out = format!("⏰ **Tomorrow for {heading}**");
    for event in events {
        out.push('\n');
        out.push_str(&event_line(event, tz));
    }
    out
}

fn event_line(event: &CalendarEvent, tz: Tz) -> String {
    let mut line = format!(
        "• {} — **{}**",
        format_when(event.start, event.all_day, tz),
        event.title
    );
    if let Some(location) = &event.location {
        line.push_str(&format!(" ({location})"));
    }
    line
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::{TimeZone, Utc},
        medbot_calendar::types::{Audience, EventSource},
    };

    fn event(n: u32) -> CalendarEvent {
        CalendarEvent {
            id: i64::from(n),
            guild_id: "G".into(),
            year_key: "2027".into(),
            year_label: "Class of 2027".into(),
            title: format!("Event {n}"),
            start: Utc.with_ymd_and_hms(2025, 6, 16, 9, n % 60, 0).unwrap(),
            end: None,
            all_day: false,
            location: (n == 1).then(|| "Hall A".to_string()),
            description: None,
            categories: Vec::new(),
            source: EventSource::Ics,
            external_uid: None,
            audience: Audience::University,
        }
    }

    #[test]
    fn digest_truncates_with_footer() {
        let events: Vec<_> = (1..=20).map(event).collect();
        let text = digest_message("University", &events, 15, Tz::UTC);
        let bullets = text.lines().filter(|l| l.starts_with('•')).count();
        assert_eq!(bullets, 15);
        assert!(text.ends_with("…and 5 more"));
        assert!(text.contains("• Jun 16, 2025, 9:01 AM — **Event 1** (Hall A)"));
    }

    #[test]
    fn digest_without_overflow_has_no_footer() {
        let events: Vec<_> = (1..=3).map(event).collect();
        let text = digest_message("Cohort", &events, 15, Tz::UTC);
        assert!(text.starts_with("📅 **Cohort: the week ahead**"));
        assert!(!text.contains("more"));
    }

    #[test]
    fn reminder_uses_event_start() {
        let reminder = DueReminder {
            id: 1,
            event_id: 2,
            channel_id: "55".into(),
            remind_at: Utc.with_ymd_and_hms(2025, 6, 15, 9, 0, 0).unwrap(),
            event_title: "Anatomy exam".into(),
            event_start: Utc.with_ymd_and_hms(2025, 6, 16, 14, 0, 0).unwrap(),
            event_all_day: false,
        };
        assert_eq!(
            reminder_message(&reminder, Tz::UTC),
            "🔔 Reminder: **Anatomy exam** starts Jun 16, 2025, 2:00 PM"
        );
    }
}
