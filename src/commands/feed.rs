use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};

use eventfeed::models::{EventOrder, Feed, FeedConfig};
use eventfeed::scheduler::cron;
use eventfeed::storage::FeedStore;
use eventfeed::utils::truncate_text;

use super::Services;

/// Arguments of `feed set`
pub struct FeedSetParams {
    pub id: String,
    pub channel: String,
    pub schedule: String,
    pub range_days: u32,
    pub keywords: Vec<String>,
    pub keywords_or: Vec<String>,
    pub locations: Vec<String>,
    pub hashtag: Option<String>,
    pub owner: Option<String>,
    pub min_participants: Option<u32>,
    pub min_limit: Option<u32>,
    pub order: Option<String>,
}

/// Create or update a feed and schedule it; existing state is preserved
pub async fn feed_set(services: &Services, params: FeedSetParams) -> Result<()> {
    cron::parse_schedule(&params.schedule)
        .with_context(|| format!("Invalid schedule for feed {}", params.id))?;

    let order = match params.order.as_deref() {
        Some(raw) => EventOrder::parse(raw)
            .with_context(|| format!("Unknown order '{raw}' (updated, start_asc, start_desc)"))?,
        None => EventOrder::default(),
    };

    let mut config = FeedConfig::new(&params.id, params.channel, params.schedule, params.range_days);
    config.keywords_and = params.keywords;
    config.keywords_or = params.keywords_or;
    config.locations = params.locations;
    config.hashtag = params.hashtag;
    config.owner_nickname = params.owner;
    config.min_participant_count = params.min_participants;
    config.min_limit = params.min_limit;
    config.order = order;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid feed {}: {e}", params.id))?;

    let feed = match services.store.get(&params.id).await? {
        Some(existing) => Feed {
            config,
            state: existing.state,
        },
        None => Feed::new(config),
    };
    services.store.save(&feed).await?;

    let next = services.feed_scheduler().schedule_feed(&params.id).await?;
    println!("Feed '{}' saved", params.id);
    println!("  Next run: {}", format_next_run(next, services));
    Ok(())
}

pub async fn feed_remove(services: &Services, id: &str) -> Result<()> {
    services.feed_scheduler().unschedule_feed(id).await?;
    if services.store.delete(id).await? {
        println!("Feed '{id}' removed");
    } else {
        println!("Feed '{id}' not found");
    }
    Ok(())
}

pub async fn feed_list(services: &Services) -> Result<()> {
    let feeds = services.store.list().await?;
    if feeds.is_empty() {
        println!("No feeds configured");
        return Ok(());
    }

    println!("{:<20} {:<20} {:<16} {:>5} {:>6}  NEXT RUN", "ID", "CHANNEL", "SCHEDULE", "DAYS", "SENT");
    for feed in &feeds {
        println!(
            "{:<20} {:<20} {:<16} {:>5} {:>6}  {}",
            truncate_text(&feed.config.id, 20),
            truncate_text(&feed.config.channel_id, 20),
            feed.config.schedule,
            feed.config.range_days,
            feed.state.sent_events.len(),
            format_next_run(feed.state.next_run_at, services),
        );
    }
    Ok(())
}

/// Execute one feed now, outside its schedule
pub async fn feed_run(services: &Services, id: &str) -> Result<()> {
    let result = services.executor().execute(id).await;
    match &result.error {
        Some(error) => anyhow::bail!("Feed '{id}' failed: {error}"),
        None => {
            println!(
                "Feed '{id}': {} events matched, {} delivered",
                result.total, result.new_count
            );
            Ok(())
        }
    }
}

/// Run one scheduler tick over every due feed
pub async fn feed_run_due(services: &Services) -> Result<()> {
    let results = services.feed_scheduler().run_due_feeds().await;
    if results.is_empty() {
        println!("No feeds due");
        return Ok(());
    }

    for result in &results {
        match &result.error {
            Some(error) => println!("  {:<20} FAILED  {error}", result.feed_id),
            None => println!(
                "  {:<20} ok      {} matched, {} new",
                result.feed_id, result.total, result.new_count
            ),
        }
    }
    Ok(())
}

fn format_next_run(next_run_at: Option<i64>, services: &Services) -> String {
    next_run_at
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|at| {
            at.with_timezone(&services.timezone)
                .format("%Y-%m-%d %H:%M %Z")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}
