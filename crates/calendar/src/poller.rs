//! Subscription polling: fetch, parse, scope, upsert, record.

use std::sync::Arc;

use {
    chrono::Utc,
    serde::Serialize,
    tracing::{info, warn},
};

use crate::{
    Result,
    directory::GroupDirectory,
    fetch::IcsFetcher,
    ics,
    scope::resolve_scope_in,
    store::CalendarStore,
    types::{CalendarSubscription, EventSource, NewEvent, SubscriptionScope},
};

/// Year key for subscription events when the subscription names none.
pub const SUBSCRIBED_YEAR_KEY: &str = "subscribed";
pub const SUBSCRIBED_YEAR_LABEL: &str = "Subscribed";

/// How one subscription's poll ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PollOutcome {
    Imported { count: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionReport {
    pub subscription_id: i64,
    pub url: String,
    #[serde(flatten)]
    pub outcome: PollOutcome,
}

/// Result of polling every subscription of one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub guild_id: String,
    pub reports: Vec<SubscriptionReport>,
}

impl PollSummary {
    pub fn imported(&self) -> usize {
        self.reports
            .iter()
            .map(|r| match r.outcome {
                PollOutcome::Imported { count } => count,
                PollOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, PollOutcome::Failed { .. }))
            .count()
    }
}

/// Polls guild subscriptions one at a time. A failing feed is logged and
/// left with its previous `last_fetched`/`last_count`; the rest still run.
pub struct SubscriptionPoller {
    store: Arc<dyn CalendarStore>,
    directory: Arc<dyn GroupDirectory>,
    fetcher: Arc<dyn IcsFetcher>,
}

impl SubscriptionPoller {
    pub fn new(
        store: Arc<dyn CalendarStore>,
        directory: Arc<dyn GroupDirectory>,
        fetcher: Arc<dyn IcsFetcher>,
    ) -> Self {
        Self {
            store,
            directory,
            fetcher,
        }
    }

    /// Poll every guild that has subscriptions. A guild whose subscription
    /// list cannot be read is logged and skipped.
    pub async fn poll_all(&self) -> Result<Vec<PollSummary>> {
        let guilds = self.store.subscribed_guilds().await?;
        let mut summaries = Vec::with_capacity(guilds.len());
        for guild_id in guilds {
            match self.poll_guild(&guild_id).await {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(guild_id = %guild_id, error = %e, "guild poll failed"),
            }
        }
        Ok(summaries)
    }

    pub async fn poll_guild(&self, guild_id: &str) -> Result<PollSummary> {
        let subscriptions = self.store.subscriptions(guild_id).await?;
        let mut summary = PollSummary {
            guild_id: guild_id.to_string(),
            reports: Vec::with_capacity(subscriptions.len()),
        };

        for subscription in subscriptions {
            let outcome = match self.poll_subscription(&subscription).await {
                Ok(count) => {
                    info!(
                        guild_id,
                        subscription_id = subscription.id,
                        url = %subscription.url,
                        count,
                        "subscription polled"
                    );
                    PollOutcome::Imported { count }
                },
                Err(e) => {
                    warn!(
                        guild_id,
                        subscription_id = subscription.id,
                        url = %subscription.url,
                        error = %e,
                        "subscription poll failed"
                    );
                    PollOutcome::Failed {
                        error: e.to_string(),
                    }
                },
            };
            summary.reports.push(SubscriptionReport {
                subscription_id: subscription.id,
                url: subscription.url,
                outcome,
            });
        }
        Ok(summary)
    }

    /// Fetch, parse, and upsert one feed, then record the fetch. Returns the
    /// number of rows written.
    pub async fn poll_subscription(&self, subscription: &CalendarSubscription) -> Result<usize> {
        let raw = self.fetcher.fetch(&subscription.url).await?;
        let parsed = ics::parse_events(&raw);

        // Loaded once per feed rather than once per event.
        let groups = match subscription.scope {
            SubscriptionScope::Auto => self.directory.active_groups(&subscription.guild_id).await?,
            SubscriptionScope::Fixed(_) => Vec::new(),
        };

        let year_key = subscription
            .year_key
            .clone()
            .unwrap_or_else(|| SUBSCRIBED_YEAR_KEY.to_string());
        let year_label = subscription
            .year_label
            .clone()
            .or_else(|| subscription.year_key.clone())
            .unwrap_or_else(|| SUBSCRIBED_YEAR_LABEL.to_string());

        let events: Vec<NewEvent> = parsed
            .into_iter()
            .map(|details| {
                let audience = match subscription.scope {
                    SubscriptionScope::Auto => resolve_scope_in(&details.categories, &groups),
                    SubscriptionScope::Fixed(audience) => audience,
                };
                NewEvent {
                    guild_id: subscription.guild_id.clone(),
                    year_key: year_key.clone(),
                    year_label: year_label.clone(),
                    source: EventSource::Ics,
                    audience,
                    details,
                }
            })
            .collect();

        let count = self.store.upsert_by_uid(&events).await?;
        self.store
            .record_fetch(subscription.id, Utc::now(), count)
            .await?;
        Ok(count)
    }
}
