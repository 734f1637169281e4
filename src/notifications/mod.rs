//! Delivery of new events and start reminders
//!
//! The schedulers push batches through two one-way sinks:
//!
//! ```text
//!   FeedExecutor ──► DeliveryChannel::handle_new_events      (channel-scoped)
//! NotifyScheduler ──► UserDeliveryChannel::send_event_notification (user-scoped)
//! ```
//!
//! Implementations live in [`channels`]: a webhook poster and a log-only sink.

pub mod channels;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::Event;

// Re-exports
pub use channels::log::LogChannel;
pub use channels::webhook::{WebhookChannel, WebhookConfig};
pub use channels::{ChannelError, ChannelResult};

/// Batch of new or updated events for one feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDelivery {
    pub feed_id: String,
    pub channel_id: String,
    pub events: Vec<Event>,
}

/// Channel-scoped sink for feed updates
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Push a batch of new events to the feed's destination
    async fn handle_new_events(&self, delivery: &FeedDelivery) -> ChannelResult<()>;
}

/// User-scoped sink for "starting soon" reminders
#[async_trait]
pub trait UserDeliveryChannel: Send + Sync {
    /// Push reminders for `events` to `user_id`
    async fn send_event_notification(&self, user_id: &str, events: &[Event]) -> ChannelResult<()>;
}
