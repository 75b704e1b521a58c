use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, bail},
    chrono::Utc,
    clap::Subcommand,
    medbot_calendar::{
        directory::GroupDirectory,
        ics::parse_events,
        service::{DEFAULT_UPCOMING_COUNT, ImportTarget, ManualEvent},
        store::{NotificationStore, ReminderStore, SubscriptionStore},
        text::{format_calendar_line, parse_categories_input, parse_manual_date, slugify},
        types::{Audience, NewSubscription, NotificationKind, SubscriptionScope},
    },
    medbot_config::MedbotConfig,
    medbot_cron::{JobKind, JobRunner, NotificationJobs},
    medbot_discord::DiscordOutbound,
    secrecy::ExposeSecret,
};

use crate::context::{AppContext, notification_settings};

#[derive(Subcommand)]
pub enum CalendarCommand {
    /// Parse an ICS file and print the events as JSON.
    Parse { file: PathBuf },
    /// Replace a calendar bucket with the events of an ICS file.
    Import {
        file: PathBuf,
        #[arg(long)]
        guild: String,
        #[arg(long)]
        year: String,
        /// Display label for the year (defaults to the year key).
        #[arg(long)]
        label: Option<String>,
        /// university, cohort, group, or auto.
        #[arg(long, default_value = "auto")]
        scope: String,
        /// Group slug, required with `--scope group`.
        #[arg(long)]
        group: Option<String>,
    },
    /// Add one event by hand.
    Add {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        year: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long, default_value = "university")]
        scope: String,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        title: String,
        /// `YYYY-MM-DD`, RFC 3339, or `YYYY-MM-DDTHH:MM` (UTC).
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Comma-separated tags.
        #[arg(long)]
        categories: Option<String>,
        #[arg(long, default_value_t = false)]
        all_day: bool,
    },
    /// List upcoming events.
    Upcoming {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        year: Option<String>,
        #[arg(long, default_value_t = DEFAULT_UPCOMING_COUNT)]
        count: usize,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Events a member can see over the coming days.
    Schedule {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[arg(long, default_value_t = 25)]
        limit: usize,
    },
    /// Subscribe a guild to an ICS feed URL (updates an existing one).
    Subscribe {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "auto")]
        scope: String,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        year: Option<String>,
        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a feed subscription.
    Unsubscribe {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        url: String,
    },
    /// List a guild's feed subscriptions.
    Subscriptions {
        #[arg(long)]
        guild: String,
    },
    /// Poll subscriptions now (one guild, or all).
    Poll {
        #[arg(long)]
        guild: Option<String>,
    },
    /// Register the channel that receives digests or reminders for an audience.
    NotifyChannel {
        #[arg(long)]
        guild: String,
        /// digest or reminder.
        #[arg(long = "type")]
        kind: NotificationKind,
        #[arg(long)]
        scope: String,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        channel: String,
    },
    /// Schedule a reminder for one event.
    Remind {
        #[arg(long)]
        event: i64,
        #[arg(long)]
        at: String,
        #[arg(long)]
        channel: String,
    },
    /// Run one notification job immediately.
    RunJob { job: JobKind },
    /// Create a study group.
    GroupCreate {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// Add a member to a study group.
    GroupAddMember {
        #[arg(long)]
        guild: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        user: String,
    },
}

pub async fn handle_calendar(
    command: CalendarCommand,
    config: &MedbotConfig,
) -> anyhow::Result<()> {
    if let CalendarCommand::Parse { file } = &command {
        let raw = read_file(file)?;
        println!("{}", serde_json::to_string_pretty(&parse_events(&raw))?);
        return Ok(());
    }

    let ctx = AppContext::open(config).await?;
    let tz = config.notifications.display_tz()?;

    match command {
        CalendarCommand::Parse { .. } => {},
        CalendarCommand::Import {
            file,
            guild,
            year,
            label,
            scope,
            group,
        } => {
            let raw = read_file(&file)?;
            let scope = resolve_scope_arg(&ctx, &guild, &scope, group.as_deref()).await?;
            let summary = ctx
                .service
                .import_ics(
                    ImportTarget {
                        guild_id: guild,
                        year_key: year,
                        year_label: label,
                        scope,
                    },
                    &raw,
                )
                .await?;
            println!(
                "Imported {} events into year '{}'.",
                summary.total(),
                summary.year_key
            );
            for (audience, count) in &summary.buckets {
                println!("  {} — {count}", describe_audience(*audience));
            }
        },
        CalendarCommand::Add {
            guild,
            year,
            label,
            scope,
            group,
            title,
            start,
            end,
            location,
            description,
            categories,
            all_day,
        } => {
            let audience = resolve_audience_arg(&ctx, &guild, &scope, group.as_deref()).await?;
            let start = parse_date_arg("start", &start)?;
            let end = end.map(|e| parse_date_arg("end", &e)).transpose()?;
            let id = ctx
                .service
                .add_manual_event(ManualEvent {
                    guild_id: guild,
                    year_key: year,
                    year_label: label,
                    audience,
                    title,
                    start,
                    end,
                    all_day,
                    location,
                    description,
                    categories: categories
                        .as_deref()
                        .map(parse_categories_input)
                        .unwrap_or_default(),
                })
                .await?;
            println!("Added event #{id}.");
        },
        CalendarCommand::Upcoming {
            guild,
            year,
            count,
            filter,
        } => {
            let events = ctx
                .service
                .upcoming(&guild, year.as_deref(), count, filter.as_deref(), Utc::now())
                .await?;
            if events.is_empty() {
                println!("No upcoming events.");
            }
            for event in &events {
                println!("{}", format_calendar_line(event, tz));
            }
        },
        CalendarCommand::Schedule {
            guild,
            user,
            days,
            limit,
        } => {
            let events = ctx
                .service
                .personal_schedule(&guild, &user, Utc::now(), days, limit)
                .await?;
            if events.is_empty() {
                println!("Nothing scheduled in the next {days} days.");
            }
            for event in &events {
                println!("{}", format_calendar_line(event, tz));
            }
        },
        CalendarCommand::Subscribe {
            guild,
            url,
            scope,
            group,
            year,
            label,
        } => {
            let scope = resolve_scope_arg(&ctx, &guild, &scope, group.as_deref()).await?;
            let sub = ctx
                .store
                .subscribe(&NewSubscription {
                    guild_id: guild,
                    url,
                    scope,
                    year_key: year,
                    year_label: label,
                })
                .await?;
            println!("Subscription #{} saved for {}.", sub.id, sub.url);
        },
        CalendarCommand::Unsubscribe { guild, url } => {
            if ctx.store.unsubscribe(&guild, &url).await? {
                println!("Removed subscription {url}.");
            } else {
                println!("No subscription for {url}.");
            }
        },
        CalendarCommand::Subscriptions { guild } => {
            let subs = ctx.store.subscriptions(&guild).await?;
            if subs.is_empty() {
                println!("No subscriptions.");
            }
            for sub in &subs {
                let fetched = sub
                    .last_fetched
                    .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
                println!(
                    "  #{} {} [{}] last fetched {fetched} ({} events)",
                    sub.id,
                    sub.url,
                    sub.scope.as_str(),
                    sub.last_count.unwrap_or(0)
                );
            }
        },
        CalendarCommand::Poll { guild } => {
            let summaries = match guild {
                Some(guild) => vec![ctx.poller.poll_guild(&guild).await?],
                None => ctx.poller.poll_all().await?,
            };
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        },
        CalendarCommand::NotifyChannel {
            guild,
            kind,
            scope,
            group,
            channel,
        } => {
            let audience = resolve_audience_arg(&ctx, &guild, &scope, group.as_deref()).await?;
            ctx.store
                .set_notification_channel(&guild, audience, kind, &channel)
                .await?;
            println!(
                "{} notifications for {} go to channel {channel}.",
                kind.as_str(),
                describe_audience(audience)
            );
        },
        CalendarCommand::Remind { event, at, channel } => {
            let remind_at = parse_date_arg("at", &at)?;
            let id = ctx.store.create_reminder(event, remind_at, &channel).await?;
            println!("Reminder #{id} set for {}.", remind_at.to_rfc3339());
        },
        CalendarCommand::RunJob { job } => {
            let token = config
                .discord
                .token
                .as_ref()
                .context("discord.token (or DISCORD_TOKEN) is required to deliver notifications")?;
            let sink = Arc::new(DiscordOutbound::from_token(token.expose_secret()));
            let jobs = NotificationJobs::new(
                ctx.store.clone(),
                ctx.store.clone(),
                ctx.poller.clone(),
                sink,
                notification_settings(config)?,
            );
            let report = jobs.run(job).await?;
            println!(
                "{job}: delivered {}, skipped {}, failed {}",
                report.delivered, report.skipped, report.failed
            );
        },
        CalendarCommand::GroupCreate { guild, name, label } => {
            let slug = slugify(&name);
            if slug.is_empty() {
                bail!("group name '{name}' has no usable characters");
            }
            let label = label.unwrap_or(name);
            let group = ctx.store.create_group(&guild, &slug, &label).await?;
            println!("Created group #{} '{}' ({}).", group.id, group.name, group.label);
        },
        CalendarCommand::GroupAddMember { guild, group, user } => {
            let found = find_group(&ctx, &guild, &group).await?;
            ctx.store.add_group_member(found, &user).await?;
            println!("Added {user} to {group}.");
        },
    }
    Ok(())
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn parse_date_arg(name: &str, value: &str) -> anyhow::Result<chrono::DateTime<Utc>> {
    parse_manual_date(value).with_context(|| format!("--{name}: unrecognised date '{value}'"))
}

async fn find_group(ctx: &AppContext, guild: &str, slug: &str) -> anyhow::Result<i64> {
    ctx.store
        .group_by_slug(guild, &slugify(slug))
        .await?
        .map(|g| g.id)
        .with_context(|| format!("no active group '{slug}' in guild {guild}"))
}

async fn resolve_scope_arg(
    ctx: &AppContext,
    guild: &str,
    scope: &str,
    group: Option<&str>,
) -> anyhow::Result<SubscriptionScope> {
    let group_id = match group {
        Some(slug) => Some(find_group(ctx, guild, slug).await?),
        None => None,
    };
    Ok(SubscriptionScope::from_parts(scope, group_id)?)
}

async fn resolve_audience_arg(
    ctx: &AppContext,
    guild: &str,
    scope: &str,
    group: Option<&str>,
) -> anyhow::Result<Audience> {
    match resolve_scope_arg(ctx, guild, scope, group).await? {
        SubscriptionScope::Fixed(audience) => Ok(audience),
        SubscriptionScope::Auto => {
            bail!("scope 'auto' is only valid for imports and subscriptions")
        },
    }
}

fn describe_audience(audience: Audience) -> String {
    match audience {
        Audience::Group(id) => format!("group #{id}"),
        other => other.scope().as_str().to_string(),
    }
}
