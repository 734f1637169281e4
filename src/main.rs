mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eventfeed::audit::{spawn_app_log_writer, AppLogLayer};
use eventfeed::config::Config;
use eventfeed::storage::SqliteStore;

use commands::{FeedSetParams, Services};

#[derive(Parser)]
#[command(
    name = "eventfeed",
    version,
    about = "Cron-driven event feed poller with start reminders",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configured one
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feed, reminder and cleanup schedulers until Ctrl-C
    Run,

    /// Manage feeds
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },

    /// Manage user profiles
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage start reminders
    Notify {
        #[command(subcommand)]
        action: NotifyAction,
    },

    /// Run one retention sweep
    Cleanup,
}

#[derive(Subcommand)]
enum FeedAction {
    /// Create or update a feed
    Set {
        /// Feed identifier
        id: String,

        /// Destination channel id
        #[arg(long)]
        channel: String,

        /// 5-field cron expression
        #[arg(long)]
        schedule: String,

        /// Days searched starting today
        #[arg(long, default_value = "7")]
        range_days: u32,

        /// Keyword that must match (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// Keyword of which at least one must match (repeatable)
        #[arg(long = "keyword-or")]
        keywords_or: Vec<String>,

        /// Prefecture (repeatable)
        #[arg(long = "location")]
        locations: Vec<String>,

        /// Hashtag filter, with or without '#'
        #[arg(long)]
        hashtag: Option<String>,

        /// Organizer nickname
        #[arg(long)]
        owner: Option<String>,

        /// Minimum accepted participants
        #[arg(long)]
        min_participants: Option<u32>,

        /// Minimum capacity
        #[arg(long)]
        min_limit: Option<u32>,

        /// Result order (updated, start_asc, start_desc)
        #[arg(long)]
        order: Option<String>,
    },

    /// Remove a feed
    Remove { id: String },

    /// List feeds
    List,

    /// Execute one feed now
    Run { id: String },

    /// Execute every due feed once
    RunDue,
}

#[derive(Subcommand)]
enum UserAction {
    /// Link a chat user to an event-site nickname
    Link { user_id: String, nickname: String },
}

#[derive(Subcommand)]
enum NotifyAction {
    /// Configure reminders for a user
    Set {
        user_id: String,

        /// Lead time in minutes
        #[arg(long, default_value = "10")]
        minutes: u32,

        /// Disable reminders
        #[arg(long, default_value = "false")]
        disable: bool,
    },

    /// Run one reminder cycle now
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate().context("Invalid configuration")?;

    let store = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);

    // Initialize tracing/logging
    let (app_log_layer, app_log_rx) = AppLogLayer::new();
    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose, app_log_layer)?;
    spawn_app_log_writer(app_log_rx, store.clone());

    tracing::info!(
        database = %config.database.sqlite_path.display(),
        timezone = %config.scheduler.timezone,
        "eventfeed starting"
    );

    let services = Services::new(config, store)?;

    match cli.command {
        Commands::Run => commands::run(&services).await?,

        Commands::Feed { action } => match action {
            FeedAction::Set {
                id,
                channel,
                schedule,
                range_days,
                keywords,
                keywords_or,
                locations,
                hashtag,
                owner,
                min_participants,
                min_limit,
                order,
            } => {
                let params = FeedSetParams {
                    id,
                    channel,
                    schedule,
                    range_days,
                    keywords,
                    keywords_or,
                    locations,
                    hashtag,
                    owner,
                    min_participants,
                    min_limit,
                    order,
                };
                commands::feed_set(&services, params).await?;
            }
            FeedAction::Remove { id } => commands::feed_remove(&services, &id).await?,
            FeedAction::List => commands::feed_list(&services).await?,
            FeedAction::Run { id } => commands::feed_run(&services, &id).await?,
            FeedAction::RunDue => commands::feed_run_due(&services).await?,
        },

        Commands::User { action } => match action {
            UserAction::Link { user_id, nickname } => {
                commands::user_link(&services, &user_id, &nickname).await?;
            }
        },

        Commands::Notify { action } => match action {
            NotifyAction::Set {
                user_id,
                minutes,
                disable,
            } => commands::notify_set(&services, &user_id, minutes, disable).await?,
            NotifyAction::Check => commands::notify_check(&services).await?,
        },

        Commands::Cleanup => commands::cleanup(&services).await?,
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool, app_logs: AppLogLayer) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("eventfeed=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("eventfeed={level},warn"))
            .context("Invalid log level")?
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(app_logs)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(app_logs)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
