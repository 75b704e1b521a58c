//! Core data types for calendar events, subscriptions, and notification targets.

use std::{fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

/// Audience tier of an event or notification target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    University,
    Cohort,
    Group,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::University => "university",
            Self::Cohort => "cohort",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "university" => Ok(Self::University),
            "cohort" => Ok(Self::Cohort),
            "group" => Ok(Self::Group),
            other => Err(Error::invalid_input(format!("unknown scope: {other}"))),
        }
    }
}

/// Scope plus the group it points at. A group audience always carries its id,
/// so `scope = group` and "group id present" cannot disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "scope", content = "group_id", rename_all = "lowercase")]
pub enum Audience {
    #[default]
    University,
    Cohort,
    Group(i64),
}

impl Audience {
    pub fn scope(self) -> Scope {
        match self {
            Self::University => Scope::University,
            Self::Cohort => Scope::Cohort,
            Self::Group(_) => Scope::Group,
        }
    }

    pub fn group_id(self) -> Option<i64> {
        match self {
            Self::Group(id) => Some(id),
            Self::University | Self::Cohort => None,
        }
    }

    /// Rebuild from the `(scope, group_id)` column pair.
    pub fn from_parts(scope: Scope, group_id: Option<i64>) -> Result<Self> {
        match (scope, group_id) {
            (Scope::University, None) => Ok(Self::University),
            (Scope::Cohort, None) => Ok(Self::Cohort),
            (Scope::Group, Some(id)) => Ok(Self::Group(id)),
            (Scope::Group, None) => Err(Error::invalid_input("group scope requires a group id")),
            (scope, Some(_)) => Err(Error::invalid_input(format!(
                "{scope} scope must not carry a group id"
            ))),
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group #{id}"),
            other => f.write_str(other.scope().as_str()),
        }
    }
}

/// Scope configured on a subscription or bulk import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionScope {
    /// Each event's CATEGORIES decide its audience.
    #[default]
    Auto,
    Fixed(Audience),
}

impl SubscriptionScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Fixed(audience) => audience.scope().as_str(),
        }
    }

    pub fn group_id(self) -> Option<i64> {
        match self {
            Self::Auto => None,
            Self::Fixed(audience) => audience.group_id(),
        }
    }

    pub fn from_parts(scope: &str, group_id: Option<i64>) -> Result<Self> {
        if scope == "auto" {
            return Ok(Self::Auto);
        }
        Audience::from_parts(scope.parse()?, group_id).map(Self::Fixed)
    }
}

/// Where a stored event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Manual,
    Ics,
}

impl EventSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Ics => "ics",
        }
    }
}

impl FromStr for EventSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(Self::Manual),
            "ics" => Ok(Self::Ics),
            other => Err(Error::invalid_input(format!("unknown event source: {other}"))),
        }
    }
}

/// One VEVENT as decoded from ICS text (or typed in by hand), before it is
/// assigned to a guild, year, and audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// A parsed event placed into a guild calendar, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub guild_id: String,
    pub year_key: String,
    pub year_label: String,
    pub source: EventSource,
    pub audience: Audience,
    pub details: ParsedEvent,
}

/// A stored calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: i64,
    pub guild_id: String,
    pub year_key: String,
    pub year_label: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub location: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
    pub source: EventSource,
    pub external_uid: Option<String>,
    pub audience: Audience,
}

/// The (guild, year, audience) set a bulk upload replaces wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bucket {
    pub guild_id: String,
    pub year_key: String,
    pub year_label: String,
    pub audience: Audience,
}

/// A recurring ICS feed registered by a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarSubscription {
    pub id: i64,
    pub guild_id: String,
    pub url: String,
    pub scope: SubscriptionScope,
    pub year_key: Option<String>,
    pub year_label: Option<String>,
    pub last_fetched: Option<DateTime<Utc>>,
    pub last_count: Option<i64>,
}

/// Input for creating or re-configuring a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub guild_id: String,
    pub url: String,
    pub scope: SubscriptionScope,
    pub year_key: Option<String>,
    pub year_label: Option<String>,
}

/// Kind of scheduled output a channel receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Digest,
    Reminder,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Digest => "digest",
            Self::Reminder => "reminder",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "digest" => Ok(Self::Digest),
            "reminder" => Ok(Self::Reminder),
            other => Err(Error::invalid_input(format!(
                "unknown notification type: {other}"
            ))),
        }
    }
}

/// Where a guild wants digest or reminder output delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub guild_id: String,
    pub audience: Audience,
    pub channel_id: String,
    pub kind: NotificationKind,
}

/// A reminder that is due, joined with the event it announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub id: i64,
    pub event_id: i64,
    pub channel_id: String,
    pub remind_at: DateTime<Utc>,
    pub event_title: String,
    pub event_start: DateTime<Utc>,
    pub event_all_day: bool,
}

/// A small group from the directory (CBI, anatomy lab, doctoring group, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: i64,
    pub guild_id: String,
    /// Slug; what CATEGORIES tags are matched against.
    pub name: String,
    pub label: String,
    pub active: bool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_parts_roundtrip() {
        for audience in [Audience::University, Audience::Cohort, Audience::Group(7)] {
            let back = Audience::from_parts(audience.scope(), audience.group_id()).unwrap();
            assert_eq!(back, audience);
        }
    }

    #[test]
    fn group_scope_without_id_is_rejected() {
        assert!(Audience::from_parts(Scope::Group, None).is_err());
        assert!(Audience::from_parts(Scope::Cohort, Some(3)).is_err());
    }

    #[test]
    fn subscription_scope_parses_auto() {
        assert_eq!(
            SubscriptionScope::from_parts("auto", None).unwrap(),
            SubscriptionScope::Auto
        );
        assert_eq!(
            SubscriptionScope::from_parts("group", Some(4)).unwrap(),
            SubscriptionScope::Fixed(Audience::Group(4))
        );
        assert!(SubscriptionScope::from_parts("everyone", None).is_err());
    }

    #[test]
    fn unknown_notification_kind() {
        assert!("weekly".parse::<NotificationKind>().is_err());
        assert_eq!(
            "digest".parse::<NotificationKind>().unwrap(),
            NotificationKind::Digest
        );
    }
}
