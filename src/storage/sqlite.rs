//! SQLite implementation of every store contract
//!
//! One `Mutex<Connection>` guards the database; all statements are short and
//! synchronous. Timestamps used for retention are stored as epoch milliseconds.
//!
//! ```text
//! feeds ─┬─< feed_sent_events        users
//!        │                           user_notify_settings
//!        │                           user_notify_sent
//! app_logs   action_logs   summary_cache
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    retention_cutoff, FeedStore, LogStore, SummaryCacheStore, UserNotifySentStore,
    UserNotifySettingsStore, UserStore,
};
use crate::audit::{ActionLog, AppLogEntry};
use crate::clock::{Clock, SharedClock, SystemClock};
use crate::models::{Feed, FeedConfig, FeedState, SentMark, User, UserNotifySettings};

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: SharedClock,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        Self::from_connection(conn)
    }

    /// Use `clock` for sent timestamps and retention cutoffs
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            clock: Arc::new(SystemClock),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("SQLite connection lock poisoned: {e}"))
    }

    fn cutoff_ms(&self, older_than_days: u32) -> i64 {
        retention_cutoff(self.clock.now(), older_than_days).timestamp_millis()
    }

    /// Create database schema
    fn create_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS feeds (
                    id TEXT PRIMARY KEY,
                    config TEXT NOT NULL,
                    last_run_at INTEGER,
                    next_run_at INTEGER
                );

                CREATE TABLE IF NOT EXISTS feed_sent_events (
                    feed_id TEXT NOT NULL,
                    event_id INTEGER NOT NULL,
                    updated_at TEXT NOT NULL,
                    marked_at INTEGER NOT NULL,
                    PRIMARY KEY (feed_id, event_id)
                );

                CREATE INDEX IF NOT EXISTS idx_feed_sent_events_marked
                    ON feed_sent_events(marked_at);

                CREATE TABLE IF NOT EXISTS users (
                    discord_user_id TEXT PRIMARY KEY,
                    nickname TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_notify_settings (
                    discord_user_id TEXT PRIMARY KEY,
                    enabled INTEGER NOT NULL,
                    minutes_before INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_notify_sent (
                    user_id TEXT NOT NULL,
                    event_id INTEGER NOT NULL,
                    notified_at INTEGER NOT NULL,
                    PRIMARY KEY (user_id, event_id)
                );

                CREATE INDEX IF NOT EXISTS idx_user_notify_sent_at
                    ON user_notify_sent(notified_at);

                CREATE TABLE IF NOT EXISTS app_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    level TEXT NOT NULL,
                    target TEXT NOT NULL,
                    message TEXT NOT NULL,
                    context TEXT,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_app_logs_created
                    ON app_logs(created_at);

                CREATE TABLE IF NOT EXISTS action_logs (
                    id TEXT PRIMARY KEY,
                    action TEXT NOT NULL,
                    level TEXT NOT NULL,
                    feed_id TEXT,
                    user_id TEXT,
                    message TEXT NOT NULL,
                    error TEXT,
                    duration_ms INTEGER,
                    created_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_action_logs_created
                    ON action_logs(created_at);

                CREATE TABLE IF NOT EXISTS summary_cache (
                    event_id INTEGER NOT NULL,
                    updated_at TEXT NOT NULL,
                    summary TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (event_id, updated_at)
                );
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn load_sent_events(conn: &Connection, feed_id: &str, state: &mut FeedState) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT event_id, updated_at, marked_at FROM feed_sent_events WHERE feed_id = ?1",
        )?;
        let rows = stmt.query_map(params![feed_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        for row in rows {
            let (event_id, updated_at, marked_at) = row?;
            state.sent_events.insert(
                event_id as u64,
                SentMark {
                    updated_at,
                    marked_at,
                },
            );
        }
        Ok(())
    }

    fn load_feed(
        conn: &Connection,
        id: String,
        config: String,
        last_run_at: Option<i64>,
        next_run_at: Option<i64>,
    ) -> Result<Feed> {
        let config: FeedConfig = serde_json::from_str(&config)
            .with_context(|| format!("Corrupt config for feed {id}"))?;
        let mut state = FeedState {
            last_run_at,
            next_run_at,
            ..Default::default()
        };
        Self::load_sent_events(conn, &id, &mut state)?;
        Ok(Feed { config, state })
    }
}

type FeedRow = (String, String, Option<i64>, Option<i64>);

fn feed_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp: {value}"))?
        .with_timezone(&Utc))
}

#[async_trait]
impl FeedStore for SqliteStore {
    async fn get(&self, id: &str) -> Result<Option<Feed>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, config, last_run_at, next_run_at FROM feeds WHERE id = ?1",
                params![id],
                feed_row,
            )
            .optional()
            .context("Failed to load feed")?;

        match row {
            Some((id, config, last, next)) => Ok(Some(Self::load_feed(&conn, id, config, last, next)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, feed: &Feed) -> Result<()> {
        let config = serde_json::to_string(&feed.config)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO feeds (id, config, last_run_at, next_run_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                config = excluded.config,
                last_run_at = excluded.last_run_at,
                next_run_at = excluded.next_run_at",
            params![feed.id(), config, feed.state.last_run_at, feed.state.next_run_at],
        )
        .context("Failed to save feed")?;

        tx.execute(
            "DELETE FROM feed_sent_events WHERE feed_id = ?1",
            params![feed.id()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO feed_sent_events (feed_id, event_id, updated_at, marked_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (event_id, mark) in &feed.state.sent_events {
                stmt.execute(params![
                    feed.id(),
                    *event_id as i64,
                    mark.updated_at,
                    mark.marked_at
                ])?;
            }
        }

        tx.commit().context("Failed to commit feed")?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM feed_sent_events WHERE feed_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    async fn list(&self) -> Result<Vec<Feed>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, config, last_run_at, next_run_at FROM feeds ORDER BY rowid")?;
        let rows = stmt
            .query_map([], feed_row)?
            .collect::<rusqlite::Result<Vec<FeedRow>>>()?;

        rows.into_iter()
            .map(|(id, config, last, next)| Self::load_feed(&conn, id, config, last, next))
            .collect()
    }

    async fn cleanup_sent_events(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = self.cutoff_ms(older_than_days);
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM feed_sent_events WHERE marked_at < ?1",
                params![cutoff],
            )
            .context("Failed to clean feed sent events")?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn find(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT discord_user_id, nickname FROM users WHERE discord_user_id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        discord_user_id: row.get(0)?,
                        nickname: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    async fn save(&self, user: &User) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (discord_user_id, nickname) VALUES (?1, ?2)
             ON CONFLICT(discord_user_id) DO UPDATE SET nickname = excluded.nickname",
            params![user.discord_user_id, user.nickname],
        )
        .context("Failed to save user")?;
        Ok(())
    }
}

type SettingsRow = (String, bool, u32, String);

fn settings_from_row(row: SettingsRow) -> Result<UserNotifySettings> {
    let (discord_user_id, enabled, minutes_before, updated_at) = row;
    Ok(UserNotifySettings {
        discord_user_id,
        enabled,
        minutes_before,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl UserNotifySettingsStore for SqliteStore {
    async fn find(&self, user_id: &str) -> Result<Option<UserNotifySettings>> {
        let conn = self.conn()?;
        let row: Option<SettingsRow> = conn
            .query_row(
                "SELECT discord_user_id, enabled, minutes_before, updated_at
                 FROM user_notify_settings WHERE discord_user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        row.map(settings_from_row).transpose()
    }

    async fn list_enabled(&self) -> Result<Vec<UserNotifySettings>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT discord_user_id, enabled, minutes_before, updated_at
             FROM user_notify_settings WHERE enabled = 1 ORDER BY discord_user_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<Vec<SettingsRow>>>()?;

        rows.into_iter().map(settings_from_row).collect()
    }

    async fn save(&self, settings: &UserNotifySettings) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_notify_settings (discord_user_id, enabled, minutes_before, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(discord_user_id) DO UPDATE SET
                enabled = excluded.enabled,
                minutes_before = excluded.minutes_before,
                updated_at = excluded.updated_at",
            params![
                settings.discord_user_id,
                settings.enabled,
                settings.minutes_before,
                settings.updated_at.to_rfc3339()
            ],
        )
        .context("Failed to save notify settings")?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM user_notify_settings WHERE discord_user_id = ?1",
            params![user_id],
        )?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl UserNotifySentStore for SqliteStore {
    async fn mark_sent(&self, user_id: &str, event_id: u64) -> Result<()> {
        let now = self.clock.now_ms();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO user_notify_sent (user_id, event_id, notified_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, event_id as i64, now],
        )
        .context("Failed to mark reminder sent")?;
        Ok(())
    }

    async fn get_sent_event_ids(&self, user_id: &str) -> Result<Vec<u64>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT event_id FROM user_notify_sent WHERE user_id = ?1 ORDER BY event_id")?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(|id| id as u64))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    async fn cleanup_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = self.cutoff_ms(days);
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM user_notify_sent WHERE notified_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn append_app_log(&self, entry: &AppLogEntry) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO app_logs (level, target, message, context, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.level.as_str(),
                entry.target,
                entry.message,
                entry.context,
                entry.at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn append_action_log(&self, entry: &ActionLog) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO action_logs
                (id, action, level, feed_id, user_id, message, error, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id,
                entry.action.as_str(),
                entry.level.as_str(),
                entry.feed_id,
                entry.user_id,
                entry.message,
                entry.error,
                entry.duration_ms.map(|d| d as i64),
                entry.at.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    async fn cleanup_app_logs(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = self.cutoff_ms(older_than_days);
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM app_logs WHERE created_at < ?1", params![cutoff])?;
        Ok(deleted as u64)
    }

    async fn cleanup_action_logs(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = self.cutoff_ms(older_than_days);
        let conn = self.conn()?;
        let deleted =
            conn.execute("DELETE FROM action_logs WHERE created_at < ?1", params![cutoff])?;
        Ok(deleted as u64)
    }
}

#[async_trait]
impl SummaryCacheStore for SqliteStore {
    async fn get_summary(&self, event_id: u64, updated_at: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let summary = conn
            .query_row(
                "SELECT summary FROM summary_cache WHERE event_id = ?1 AND updated_at = ?2",
                params![event_id as i64, updated_at],
                |row| row.get(0),
            )
            .optional()?;
        Ok(summary)
    }

    async fn put_summary(&self, event_id: u64, updated_at: &str, summary: &str) -> Result<()> {
        let now = self.clock.now_ms();
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO summary_cache (event_id, updated_at, summary, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![event_id as i64, updated_at, summary, now],
        )?;
        Ok(())
    }

    async fn cleanup_summary_cache(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = self.cutoff_ms(older_than_days);
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM summary_cache WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(deleted as u64)
    }
}
