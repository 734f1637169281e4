use anyhow::Result;

use eventfeed::storage::FeedStore;

use super::Services;

/// Run the three schedulers until Ctrl-C
pub async fn run(services: &Services) -> Result<()> {
    let feeds = services.feed_scheduler();
    let notify = services.notify_scheduler();
    let cleanup = services.cleanup_scheduler();

    // Feeds saved without a next run (first start, earlier bad schedule) get one now.
    for feed in services.store.list().await? {
        if feed.state.next_run_at.is_none() {
            feeds.schedule_feed(feed.id()).await?;
        }
    }

    feeds.start().await;
    notify.start().await;
    cleanup.start().await;

    println!("eventfeed running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    feeds.stop().await;
    notify.stop().await;
    cleanup.stop().await;
    Ok(())
}
