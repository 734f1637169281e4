//! Log-only delivery sink
//!
//! Used when no webhook is configured: every batch is written to the tracing
//! output and counted, nothing leaves the process.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use super::ChannelResult;
use crate::models::Event;
use crate::notifications::{DeliveryChannel, FeedDelivery, UserDeliveryChannel};
use crate::utils::truncate_text;

/// Delivery channel that only logs
#[derive(Debug, Default)]
pub struct LogChannel {
    delivered: AtomicU64,
}

impl LogChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events logged so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn log_events(&self, events: &[Event]) {
        for event in events {
            tracing::info!(
                event_id = event.id,
                started_at = %event.started_at,
                accepted = event.accepted,
                url = %event.url,
                "  {}",
                truncate_text(&event.title, 80)
            );
        }
        self.delivered
            .fetch_add(events.len() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl DeliveryChannel for LogChannel {
    async fn handle_new_events(&self, delivery: &FeedDelivery) -> ChannelResult<()> {
        tracing::info!(
            feed_id = %delivery.feed_id,
            channel_id = %delivery.channel_id,
            count = delivery.events.len(),
            "New events"
        );
        self.log_events(&delivery.events);
        Ok(())
    }
}

#[async_trait]
impl UserDeliveryChannel for LogChannel {
    async fn send_event_notification(&self, user_id: &str, events: &[Event]) -> ChannelResult<()> {
        tracing::info!(user_id = %user_id, count = events.len(), "Starting soon");
        self.log_events(events);
        Ok(())
    }
}
