mod bot;
mod calendar_commands;
mod context;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    medbot_config::MedbotConfig,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "medbot", about = "Medbot: calendar and notification bot for Discord")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to ./medbot.toml, then the user config dir).
    #[arg(long, global = true, env = "MEDBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and run the scheduler (default when no subcommand
    /// is provided).
    Run,
    #[command(flatten)]
    Calendar(calendar_commands::CalendarCommand),
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<MedbotConfig> {
    let mut config = match &cli.config {
        Some(path) => medbot_config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => medbot_config::discover_and_load(),
    };
    medbot_config::apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);
    debug!(version = env!("CARGO_PKG_VERSION"), "medbot starting");

    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Run) => {
            info!("starting bot");
            bot::run_bot(&config).await
        },
        Some(Commands::Calendar(command)) => {
            calendar_commands::handle_calendar(command, &config).await
        },
    }
}
