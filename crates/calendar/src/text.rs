//! Slugs, manual date input, filtering, and one-line event formatting.

use {
    chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc},
    chrono_tz::Tz,
};

use crate::types::CalendarEvent;

/// Year key used when none is given.
pub const DEFAULT_YEAR_KEY: &str = "default";

const DESCRIPTION_PREVIEW_CHARS: usize = 180;

/// Lowercase, collapse non-alphanumeric runs into `-`, trim leading and
/// trailing hyphens.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Slugified year key, falling back to [`DEFAULT_YEAR_KEY`].
pub fn sanitize_year_key(input: &str) -> String {
    let slug = slugify(input);
    if slug.is_empty() {
        DEFAULT_YEAR_KEY.to_string()
    } else {
        slug
    }
}

/// Comma-separated tag list typed by a user.
pub fn parse_categories_input(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a hand-typed date: `YYYY-MM-DD` (UTC midnight), RFC 3339, or
/// `YYYY-MM-DDTHH:MM[:SS]` read as UTC.
pub fn parse_manual_date(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// End used when a manual event is added without one.
pub fn default_end(start: DateTime<Utc>, all_day: bool) -> DateTime<Utc> {
    if all_day {
        start + Duration::days(1)
    } else {
        start + Duration::hours(1)
    }
}

/// Whether an event is still upcoming at `reference`. All-day events with an
/// end stay upcoming until that end passes.
pub fn is_upcoming(event: &CalendarEvent, reference: DateTime<Utc>) -> bool {
    match (event.all_day, event.end) {
        (true, Some(end)) => end >= reference,
        _ => event.start >= reference,
    }
}

/// Case-insensitive substring match over title, location, description, and
/// categories. An empty term matches everything.
pub fn matches_filter(event: &CalendarEvent, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    let hit = |value: &str| value.to_lowercase().contains(&term);
    hit(&event.title)
        || event.location.as_deref().is_some_and(hit)
        || event.description.as_deref().is_some_and(hit)
        || event.categories.iter().any(|c| hit(c))
}

/// `Jun 15, 2025, 2:30 PM` (or just the date for all-day events) in `tz`.
pub fn format_when(start: DateTime<Utc>, all_day: bool, tz: Tz) -> String {
    if all_day {
        // All-day dates are stored at UTC midnight; shifting them would change the day.
        start.format("%b %-d, %Y").to_string()
    } else {
        start
            .with_timezone(&tz)
            .format("%b %-d, %Y, %-I:%M %p")
            .to_string()
    }
}

/// Markdown line: `**when** — title _( location )_` plus a trimmed description.
pub fn format_calendar_line(event: &CalendarEvent, tz: Tz) -> String {
    let mut line = format!(
        "**{}** — {}",
        format_when(event.start, event.all_day, tz),
        event.title
    );
    if let Some(location) = &event.location {
        line.push_str(&format!(" _( {location} )_"));
    }
    if let Some(description) = &event.description {
        line.push('\n');
        line.push_str(&truncate_chars(description, DESCRIPTION_PREVIEW_CHARS));
    }
    line
}

/// Cut to at most `max` chars, ending in `…` when shortened.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push('…');
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{Audience, EventSource},
        chrono::TimeZone,
        rstest::rstest,
    };

    fn event(title: &str) -> CalendarEvent {
        CalendarEvent {
            id: 1,
            guild_id: "g".into(),
            year_key: "2027".into(),
            year_label: "Class of 2027".into(),
            title: title.into(),
            start: Utc.with_ymd_and_hms(2025, 6, 15, 14, 30, 0).unwrap(),
            end: None,
            all_day: false,
            location: None,
            description: None,
            categories: Vec::new(),
            source: EventSource::Manual,
            external_uid: None,
            audience: Audience::University,
        }
    }

    #[rstest]
    #[case("CBI A", "cbi-a")]
    #[case("  --Anatomy__Lab 3!! ", "anatomy-lab-3")]
    #[case("University", "university")]
    #[case("Class of 2027", "class-of-2027")]
    #[case("!!!", "")]
    fn slugify_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(slugify(input), expected);
    }

    #[test]
    fn year_key_falls_back_to_default() {
        assert_eq!(sanitize_year_key("  "), DEFAULT_YEAR_KEY);
        assert_eq!(sanitize_year_key("Class of 2027"), "class-of-2027");
    }

    #[test]
    fn categories_input() {
        assert_eq!(parse_categories_input(" a, ,b ,"), vec!["a", "b"]);
        assert!(parse_categories_input("").is_empty());
    }

    #[rstest]
    #[case("2025-06-15", Some((2025, 6, 15, 0, 0)))]
    #[case("2025-06-15T09:45", Some((2025, 6, 15, 9, 45)))]
    #[case("2025-06-15 09:45", Some((2025, 6, 15, 9, 45)))]
    #[case("2025-06-15T09:45:00-04:00", Some((2025, 6, 15, 13, 45)))]
    #[case("next tuesday", None)]
    fn manual_dates(#[case] input: &str, #[case] expected: Option<(i32, u32, u32, u32, u32)>) {
        let expected =
            expected.map(|(y, mo, d, h, mi)| Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap());
        assert_eq!(parse_manual_date(input), expected);
    }

    #[test]
    fn default_end_depends_on_all_day() {
        let start = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();
        assert_eq!(default_end(start, true) - start, Duration::days(1));
        assert_eq!(default_end(start, false) - start, Duration::hours(1));
    }

    #[test]
    fn filter_matches_any_text_field() {
        let mut ev = event("Anatomy exam");
        ev.categories = vec!["Block 2".into()];
        ev.location = Some("Gym".into());
        assert!(matches_filter(&ev, ""));
        assert!(matches_filter(&ev, "ANATOMY"));
        assert!(matches_filter(&ev, "gym"));
        assert!(matches_filter(&ev, "block"));
        assert!(!matches_filter(&ev, "pharm"));
    }

    #[test]
    fn all_day_event_stays_upcoming_until_end() {
        let mut ev = event("Holiday");
        ev.all_day = true;
        ev.start = Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap();
        ev.end = Some(Utc.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap());
        let noon = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        assert!(is_upcoming(&ev, noon));
        ev.all_day = false;
        assert!(!is_upcoming(&ev, noon));
    }

    #[test]
    fn calendar_line_format() {
        let mut ev = event("Orientation");
        ev.location = Some("Hall A".into());
        assert_eq!(
            format_calendar_line(&ev, Tz::UTC),
            "**Jun 15, 2025, 2:30 PM** — Orientation _( Hall A )_"
        );
        assert_eq!(
            format_when(ev.start, false, Tz::America__New_York),
            "Jun 15, 2025, 10:30 AM"
        );
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let mut ev = event("Talk");
        ev.description = Some("x".repeat(400));
        let line = format_calendar_line(&ev, Tz::UTC);
        let preview = line.lines().nth(1).unwrap();
        assert_eq!(preview.chars().count(), DESCRIPTION_PREVIEW_CHARS - 2);
        assert!(preview.ends_with('…'));
    }
}
