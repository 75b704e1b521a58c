//! Long-running mode: Discord gateway plus the notification scheduler.

use std::sync::Arc;

use {
    anyhow::Context,
    medbot_channels::MessageSink,
    medbot_config::MedbotConfig,
    medbot_cron::{NotificationJobs, Scheduler},
    medbot_discord::{DiscordHandler, DiscordOutbound},
    secrecy::ExposeSecret,
    serenity::{Client, all::ApplicationId},
    tracing::{error, info, warn},
};

use crate::context::{AppContext, job_specs, notification_settings};

pub async fn run_bot(config: &MedbotConfig) -> anyhow::Result<()> {
    let token = config
        .discord
        .token
        .as_ref()
        .context("discord.token (or DISCORD_TOKEN) must be set to run the bot")?;

    let ctx = AppContext::open(config).await?;

    let mut builder = Client::builder(token.expose_secret(), DiscordHandler::intents())
        .event_handler(DiscordHandler);
    if let Some(id) = config.discord.application_id.filter(|id| *id != 0) {
        builder = builder.application_id(ApplicationId::new(id));
    }
    let mut client = builder.await.context("failed to build discord client")?;

    let sink: Arc<dyn MessageSink> = Arc::new(DiscordOutbound::new(client.http.clone()));
    let jobs = Arc::new(NotificationJobs::new(
        ctx.store.clone(),
        ctx.store.clone(),
        ctx.poller.clone(),
        sink,
        notification_settings(config)?,
    ));
    let scheduler = Scheduler::new(jobs, job_specs(config))?;

    let shard_manager = client.shard_manager.clone();
    let mut gateway = tokio::spawn(async move { client.start().await });

    if config.scheduler.enabled {
        scheduler.start().await?;
    } else {
        warn!("scheduler disabled, no notifications will be sent");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "medbot running");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown requested");
        },
        result = &mut gateway => {
            match result {
                Ok(Ok(())) => warn!("discord gateway exited"),
                Ok(Err(e)) => error!(error = %e, "discord gateway failed"),
                Err(e) => error!(error = %e, "discord gateway task panicked"),
            }
        },
    }

    scheduler.stop().await;
    shard_manager.shutdown_all().await;
    gateway.abort();
    info!("medbot stopped");
    Ok(())
}
