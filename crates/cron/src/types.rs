//! Core data types for the notification scheduler.

use std::{fmt, ops::AddAssign, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// The recurring notification jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Fire per-event reminders whose time has come.
    ReminderSweep,
    /// Re-fetch every guild's subscribed feeds.
    SubscriptionPoll,
    /// Post the week-ahead summary to digest channels.
    WeeklyDigest,
    /// Announce tomorrow's events to reminder channels and group members.
    DayBeforeReminder,
}

impl JobKind {
    pub const ALL: [Self; 4] = [
        Self::ReminderSweep,
        Self::SubscriptionPoll,
        Self::WeeklyDigest,
        Self::DayBeforeReminder,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReminderSweep => "reminders",
            Self::SubscriptionPoll => "poll",
            Self::WeeklyDigest => "digest",
            Self::DayBeforeReminder => "day-before",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::message(format!("unknown job: {s}")))
    }
}

/// How a job is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum JobSchedule {
    /// Cron expression (5-field standard or 6-field with seconds).
    Cron {
        expr: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
    },
    /// Fixed interval in millis, first run one interval after start.
    Every { every_ms: u64 },
}

/// A job and when it runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    pub kind: JobKind,
    pub schedule: JobSchedule,
}

/// Delivery tally of one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl AddAssign for JobReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Outcome of a single job run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Ok,
    Error,
}

/// Runtime state of a scheduled job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<JobReport>,
    /// Runs of this job currently executing.
    #[serde(default)]
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledJob {
    pub spec: JobSpec,
    pub state: JobState,
}

/// Snapshot returned by `Scheduler::status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<ScheduledJob>,
    pub next_run_at_ms: Option<u64>,
}
