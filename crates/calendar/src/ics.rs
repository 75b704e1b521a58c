//! ICS (RFC 5545) reader for VEVENT blocks.
//!
//! Only the properties the calendar stores are decoded: SUMMARY, LOCATION,
//! DESCRIPTION, UID, CATEGORIES, DTSTART and DTEND. Everything else,
//! including nested components such as VALARM, is skipped.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::types::ParsedEvent;

/// Title used when a VEVENT carries no SUMMARY.
pub const UNTITLED_EVENT: &str = "Untitled event";

/// Parse raw calendar text into events sorted by start.
///
/// Events without a decodable DTSTART are dropped; a bad line never aborts
/// the rest of the feed. Pure: the same input always yields the same output.
pub fn parse_events(raw: &str) -> Vec<ParsedEvent> {
    let mut events = Vec::new();
    let mut current: Option<PendingEvent> = None;
    // Depth of components nested inside the current VEVENT (VALARM, ...).
    let mut nested = 0usize;

    for line in unfold_lines(raw) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(component) = strip_prefix_ignore_case(line, "BEGIN:") {
            if component.eq_ignore_ascii_case("VEVENT") {
                current = Some(PendingEvent::default());
                nested = 0;
            } else if current.is_some() {
                nested += 1;
            }
            continue;
        }

        if let Some(component) = strip_prefix_ignore_case(line, "END:") {
            if component.eq_ignore_ascii_case("VEVENT") {
                if let Some(event) = current.take().and_then(PendingEvent::finish) {
                    events.push(event);
                }
                nested = 0;
            } else if current.is_some() {
                nested = nested.saturating_sub(1);
            }
            continue;
        }

        let Some(pending) = current.as_mut() else {
            continue;
        };
        if nested > 0 {
            continue;
        }
        if let Some(content) = ContentLine::parse(line) {
            pending.apply(&content);
        }
    }

    events.sort_by_key(|event| event.start);
    events
}

/// Join folded continuation lines (leading space or tab) onto the previous
/// logical line.
fn unfold_lines(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match (line.strip_prefix([' ', '\t']), lines.last_mut()) {
            (Some(rest), Some(previous)) => previous.push_str(rest),
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| line[prefix.len()..].trim())
}

/// `NAME;PARAM=value;...:VALUE`
#[derive(Debug)]
struct ContentLine<'a> {
    name: String,
    params: Vec<(String, String)>,
    value: &'a str,
}

impl<'a> ContentLine<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let colon = find_unquoted(line, ':')?;
        let (head, value) = (&line[..colon], line[colon + 1..].trim());

        let mut segments = split_unquoted(head, ';').into_iter();
        let name = segments.next()?.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }

        let params = segments
            .filter_map(|segment| {
                let (key, val) = segment.split_once('=')?;
                let key = key.trim();
                let val = val.trim().trim_matches('"');
                (!key.is_empty() && !val.is_empty())
                    .then(|| (key.to_ascii_uppercase(), val.to_string()))
            })
            .collect();

        Some(Self {
            name,
            params,
            value,
        })
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn is_date_value(&self) -> bool {
        self.param("VALUE")
            .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
    }
}

fn find_unquoted(text: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(idx),
            _ => {},
        }
    }
    None
}

fn split_unquoted(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            c if c == separator && !quoted => {
                parts.push(&text[start..idx]);
                start = idx + c.len_utf8();
            },
            _ => {},
        }
    }
    parts.push(&text[start..]);
    parts
}

#[derive(Debug, Default)]
struct PendingEvent {
    summary: Option<String>,
    uid: Option<String>,
    location: Option<String>,
    description: Option<String>,
    categories: Vec<String>,
    start: Option<(DateTime<Utc>, bool)>,
    end: Option<DateTime<Utc>>,
}

impl PendingEvent {
    fn apply(&mut self, line: &ContentLine<'_>) {
        match line.name.as_str() {
            "SUMMARY" => self.summary = non_empty(unescape_text(line.value)),
            "LOCATION" => self.location = non_empty(unescape_text(line.value)),
            "DESCRIPTION" => self.description = non_empty(unescape_text(line.value)),
            "UID" => self.uid = non_empty(line.value.to_string()),
            "CATEGORIES" => self.categories = split_categories(line.value),
            "DTSTART" => self.start = decode_date(line.value, line.is_date_value()),
            "DTEND" => {
                self.end = decode_date(line.value, line.is_date_value()).map(|(at, _)| at);
            },
            _ => {},
        }
    }

    fn finish(self) -> Option<ParsedEvent> {
        let (start, all_day) = self.start?;
        Some(ParsedEvent {
            title: self.summary.unwrap_or_else(|| UNTITLED_EVENT.to_string()),
            uid: self.uid,
            start,
            // An end before the start is not a usable range.
            end: self.end.filter(|end| *end >= start),
            all_day,
            location: self.location,
            description: self.description,
            categories: self.categories,
        })
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Undo TEXT escaping: `\n`/`\N` become newlines, `\,` `\;` `\\` lose the backslash.
fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Split a CATEGORIES value on unescaped commas; trims and drops empty tags.
fn split_categories(value: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in value.chars() {
        if escaped {
            current.push('\\');
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == ',' {
            tags.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    tags.push(current);

    tags.iter()
        .map(|tag| unescape_text(tag.trim()))
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Decode a DTSTART/DTEND value into `(instant, all_day)`.
///
/// `YYYYMMDD` (or `VALUE=DATE`) is an all-day date at UTC midnight.
/// `YYYYMMDDTHHMMSSZ` is UTC. A bare `YYYYMMDDTHHMMSS` is read as a naive
/// wall-clock time and stored without any offset; TZID parameters are not
/// applied.
pub(crate) fn decode_date(value: &str, date_only: bool) -> Option<(DateTime<Utc>, bool)> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let is_bare_date = value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit());
    if date_only || is_bare_date {
        let date = compact_date(value.get(..8)?)?;
        return Some((date.and_hms_opt(0, 0, 0)?.and_utc(), true));
    }

    let body = value.strip_suffix(['Z', 'z']).unwrap_or(value);
    if let Some(naive) = compact_date_time(body) {
        return Some((naive.and_utc(), false));
    }

    // Some producers emit extended ISO 8601 instead of the basic format.
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some((dt.with_timezone(&Utc), false));
    }
    NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| (naive.and_utc(), false))
}

fn compact_date(text: &str) -> Option<NaiveDate> {
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::from_ymd_opt(
        text[0..4].parse().ok()?,
        text[4..6].parse().ok()?,
        text[6..8].parse().ok()?,
    )
}

fn compact_date_time(text: &str) -> Option<NaiveDateTime> {
    let (date, time) = text.split_once(['T', 't'])?;
    if time.len() != 6 || !time.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    compact_date(date)?.and_hms_opt(
        time[0..2].parse().ok()?,
        time[2..4].parse().ok()?,
        time[4..6].parse().ok()?,
    )
}
