pub mod cleanup;
pub mod feed;
pub mod notify;
pub mod run;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::sync::Arc;

use eventfeed::audit::{SharedAuditSink, StoreAuditSink};
use eventfeed::config::Config;
use eventfeed::notifications::{DeliveryChannel, LogChannel, UserDeliveryChannel, WebhookChannel};
use eventfeed::scheduler::{
    CleanupScheduler, CleanupStores, FeedExecutor, FeedScheduler, NotifyScheduler, NotifyStores,
};
use eventfeed::source::ConnpassClient;
use eventfeed::storage::SqliteStore;

// Re-export command functions for convenience
pub use cleanup::cleanup;
pub use feed::{feed_list, feed_remove, feed_run, feed_run_due, feed_set, FeedSetParams};
pub use notify::{notify_check, notify_set, user_link};
pub use run::run;

/// Components shared by every command, wired from one [`Config`]
pub struct Services {
    pub config: Config,
    pub timezone: Tz,
    pub store: Arc<SqliteStore>,
    pub source: Arc<ConnpassClient>,
    pub feed_delivery: Arc<dyn DeliveryChannel>,
    pub user_delivery: Arc<dyn UserDeliveryChannel>,
    pub audit: SharedAuditSink,
}

impl Services {
    pub fn new(config: Config, store: Arc<SqliteStore>) -> Result<Self> {
        let timezone = config.timezone()?;
        let source = Arc::new(
            ConnpassClient::new(config.api.clone()).context("Failed to create API client")?,
        );

        let (feed_delivery, user_delivery): (Arc<dyn DeliveryChannel>, Arc<dyn UserDeliveryChannel>) =
            match config.delivery.webhook() {
                Some(webhook) => {
                    let channel =
                        Arc::new(WebhookChannel::new(webhook).context("Failed to create webhook")?);
                    (channel.clone(), channel)
                }
                None => {
                    tracing::info!("No webhook configured, deliveries are only logged");
                    let channel = Arc::new(LogChannel::new());
                    (channel.clone(), channel)
                }
            };

        let audit: SharedAuditSink = Arc::new(StoreAuditSink::new(store.clone()));

        Ok(Self {
            config,
            timezone,
            store,
            source,
            feed_delivery,
            user_delivery,
            audit,
        })
    }

    pub fn executor(&self) -> Arc<FeedExecutor> {
        Arc::new(
            FeedExecutor::new(
                self.store.clone(),
                self.source.clone(),
                self.feed_delivery.clone(),
            )
            .with_audit(self.audit.clone())
            .with_retry(self.config.retry.clone())
            .with_timezone(self.timezone)
            .with_page_size(self.config.api.page_size),
        )
    }

    pub fn feed_scheduler(&self) -> Arc<FeedScheduler> {
        Arc::new(
            FeedScheduler::new(self.store.clone(), self.executor())
                .with_audit(self.audit.clone())
                .with_timezone(self.timezone)
                .with_check_interval(self.config.check_interval())
                .with_rate_limit_delay(self.config.rate_limit_delay()),
        )
    }

    pub fn notify_scheduler(&self) -> Arc<NotifyScheduler> {
        let stores = NotifyStores {
            settings: self.store.clone(),
            users: self.store.clone(),
            sent: self.store.clone(),
        };
        Arc::new(
            NotifyScheduler::new(stores, self.source.clone(), self.user_delivery.clone())
                .with_audit(self.audit.clone())
                .with_timezone(self.timezone)
                .with_check_interval(self.config.notify_check_interval())
                .with_user_delay(self.config.notify_user_delay())
                .with_cache_ttl(self.config.notify_cache_ttl())
                .with_sent_retention_days(self.config.notify.sent_retention_days)
                .with_page_size(self.config.api.page_size),
        )
    }

    pub fn cleanup_scheduler(&self) -> Arc<CleanupScheduler> {
        let stores = CleanupStores::default()
            .with_logs(self.store.clone())
            .with_feeds(self.store.clone())
            .with_summaries(self.store.clone())
            .with_notify_sent(self.store.clone());
        Arc::new(
            CleanupScheduler::new(self.config.cleanup.clone(), stores)
                .with_audit(self.audit.clone()),
        )
    }
}
