//! Recurring notification jobs: reminder sweep, subscription poll, weekly
//! digest, and day-before reminders, driven by cron expressions.

pub mod error;
pub mod jobs;
pub mod render;
pub mod schedule;
pub mod service;
pub mod types;

pub use {
    error::{Error, Result},
    jobs::{NotificationJobs, NotificationSettings},
    service::{JobRunner, Scheduler},
    types::{JobKind, JobReport, JobSchedule, JobSpec, SchedulerStatus},
};
