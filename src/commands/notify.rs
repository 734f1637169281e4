use anyhow::Result;
use chrono::Utc;

use eventfeed::models::{User, UserNotifySettings};
use eventfeed::storage::{UserNotifySettingsStore, UserStore};

use super::Services;

/// Link a chat user to an event-site nickname
pub async fn user_link(services: &Services, user_id: &str, nickname: &str) -> Result<()> {
    let user = User {
        discord_user_id: user_id.to_string(),
        nickname: nickname.to_string(),
    };
    UserStore::save(services.store.as_ref(), &user).await?;
    println!("User '{user_id}' linked to '{nickname}'");
    Ok(())
}

/// Enable, update or disable reminders for a user
pub async fn notify_set(
    services: &Services,
    user_id: &str,
    minutes_before: u32,
    disable: bool,
) -> Result<()> {
    if !disable && minutes_before == 0 {
        anyhow::bail!("--minutes must be greater than 0");
    }

    let settings = UserNotifySettings {
        discord_user_id: user_id.to_string(),
        enabled: !disable,
        minutes_before,
        updated_at: Utc::now(),
    };
    UserNotifySettingsStore::save(services.store.as_ref(), &settings).await?;

    if disable {
        println!("Reminders disabled for '{user_id}'");
    } else {
        println!("Reminders enabled for '{user_id}': {minutes_before} minutes before start");
        if UserStore::find(services.store.as_ref(), user_id).await?.is_none() {
            println!("  Note: no linked profile yet, run `user link` first");
        }
    }
    Ok(())
}

/// Run one reminder cycle now
pub async fn notify_check(services: &Services) -> Result<()> {
    let report = services.notify_scheduler().run_cycle().await?;
    if report.overlapped {
        println!("Another reminder cycle is in progress");
        return Ok(());
    }

    println!("Reminder cycle completed");
    println!("  Users:          {}", report.users);
    println!("  Notified users: {}", report.notified_users);
    println!("  Reminders sent: {}", report.events_sent);
    println!("  Skipped users:  {}", report.skipped_users);
    println!("  Failed users:   {}", report.failed_users);
    println!("  Records pruned: {}", report.cleaned_records);
    Ok(())
}
