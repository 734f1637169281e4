//! Tracing layer mirroring warnings and errors into the `app_logs` table
//!
//! ```text
//! tracing::warn!/error! ──► AppLogLayer::on_event ──► mpsc ──► writer task ──► LogStore
//! ```
//!
//! `on_event` runs synchronously inside the emitting call, so it only formats
//! the event and hands it to an unbounded channel. The writer task owns the
//! store. Events emitted by this module are skipped to avoid feedback loops.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, Layer};

use super::{AppLogEntry, LogLevel};
use crate::storage::LogStore;

/// Tracing layer forwarding WARN and ERROR events to a writer task
#[derive(Debug, Clone)]
pub struct AppLogLayer {
    tx: UnboundedSender<AppLogEntry>,
    min_level: LogLevel,
}

impl AppLogLayer {
    /// Create the layer and the receiving end for [`spawn_app_log_writer`]
    pub fn new() -> (Self, UnboundedReceiver<AppLogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                min_level: LogLevel::Warn,
            },
            rx,
        )
    }

    /// Lowest level that is forwarded
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl<S> Layer<S> for AppLogLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from_tracing(metadata.level());
        if level < self.min_level || metadata.target() == module_path!() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .fields
            .remove("message")
            .unwrap_or_else(|| metadata.name().to_string());
        let context = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        // Receiver gone means the writer shut down; drop silently.
        let _ = self.tx.send(AppLogEntry {
            level,
            target: metadata.target().to_string(),
            message,
            context,
            at: Utc::now(),
        });
    }
}

/// Drain forwarded events into `store` until every sender is dropped
pub fn spawn_app_log_writer(
    mut rx: UnboundedReceiver<AppLogEntry>,
    store: Arc<dyn LogStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(entry) = rx.recv().await {
            if let Err(e) = store.append_app_log(&entry).await {
                // Must not go through tracing at WARN or above.
                eprintln!("failed to persist app log: {e}");
            }
        }
    })
}

#[derive(Default)]
struct FieldVisitor {
    fields: BTreeMap<String, String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }
}
