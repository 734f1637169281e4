use anyhow::Result;
use std::time::Instant;

use eventfeed::utils::format_duration_ms;

use super::Services;

/// Run one retention sweep and print what was deleted
pub async fn cleanup(services: &Services) -> Result<()> {
    let scheduler = services.cleanup_scheduler();
    let retention = scheduler.config().clone();

    let started = Instant::now();
    let report = scheduler.run_cleanup().await?;

    println!("Cleanup completed in {}", format_duration_ms(started.elapsed().as_millis() as u64));
    println!("  App logs (>{}d):            {}", retention.app_log_days, report.app_logs);
    println!("  Action logs (>{}d):         {}", retention.action_log_days, report.action_logs);
    println!("  Feed sent events (>{}d):    {}", retention.feed_sent_event_days, report.feed_sent_events);
    println!("  Summary cache (>{}d):       {}", retention.summary_cache_days, report.summary_cache);
    println!("  Reminder records (>{}d):    {}", retention.notify_sent_days, report.notify_sent);
    println!("  Total:                      {}", report.total_deleted);
    Ok(())
}
