//! Persistent store (SQLite): channel activation, user preferences,
//! conversation turns, and error records.

use crate::Role;
use crate::error::StoreError;
use anyhow::Context as _;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row as _, SqlitePool};
use std::path::Path;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-channel activation state.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel_id: String,
    pub active: bool,
    pub last_response_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ChannelState {
    /// State assumed for a channel seen for the first time.
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            active: false,
            last_response_at: None,
        }
    }
}

/// Per-user preference row.
#[derive(Debug, Clone)]
pub struct UserPreference {
    pub user_id: String,
    pub ignored: bool,
    pub message_count: i64,
    pub response_count: i64,
}

impl UserPreference {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ignored: false,
            message_count: 0,
            response_count: 0,
        }
    }
}

/// One immutable conversation exchange record.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Append-only failure event.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub id: String,
    pub category: String,
    pub message: String,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// SQLite-backed store. Owns all four entity types; other components read and
/// write through this interface per event and keep no long-lived copies.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to (or create) the database file.
    pub async fn connect(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StoreError::Connect)?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Wrap an existing pool (used by tests with in-memory SQLite).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema.
    pub async fn initialize(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                channel_id TEXT PRIMARY KEY,
                active INTEGER NOT NULL DEFAULT 0,
                last_response_at TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_prefs (
                user_id TEXT PRIMARY KEY,
                ignored INTEGER NOT NULL DEFAULT 0,
                message_count INTEGER NOT NULL DEFAULT 0,
                response_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_channel_created \
             ON turns(channel_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS errors (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                channel_id TEXT,
                user_id TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(())
    }

    /// Load a channel's state, or the first-seen default if absent.
    pub async fn get_channel_state(&self, channel_id: &str) -> StoreResult<ChannelState> {
        let row = sqlx::query(
            "SELECT channel_id, active, last_response_at FROM channels WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => ChannelState {
                channel_id: row.try_get("channel_id").unwrap_or_default(),
                active: row.try_get::<i64, _>("active").unwrap_or(0) != 0,
                last_response_at: row.try_get("last_response_at").ok(),
            },
            None => ChannelState::new(channel_id),
        })
    }

    /// Upsert a channel's state.
    pub async fn put_channel_state(&self, state: &ChannelState) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO channels (channel_id, active, last_response_at)
            VALUES (?, ?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET
                active = excluded.active,
                last_response_at = excluded.last_response_at
            "#,
        )
        .bind(&state.channel_id)
        .bind(state.active as i64)
        .bind(state.last_response_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Channel ids with responses currently enabled.
    pub async fn active_channels(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT channel_id FROM channels WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get("channel_id").ok())
            .collect())
    }

    /// Load a user's preference row, or the default if absent.
    pub async fn get_user_preference(&self, user_id: &str) -> StoreResult<UserPreference> {
        let row = sqlx::query(
            "SELECT user_id, ignored, message_count, response_count \
             FROM user_prefs WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => UserPreference {
                user_id: row.try_get("user_id").unwrap_or_default(),
                ignored: row.try_get::<i64, _>("ignored").unwrap_or(0) != 0,
                message_count: row.try_get("message_count").unwrap_or(0),
                response_count: row.try_get("response_count").unwrap_or(0),
            },
            None => UserPreference::new(user_id),
        })
    }

    /// Upsert a user's preference row.
    pub async fn put_user_preference(&self, pref: &UserPreference) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_prefs (user_id, ignored, message_count, response_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                ignored = excluded.ignored,
                message_count = excluded.message_count,
                response_count = excluded.response_count
            "#,
        )
        .bind(&pref.user_id)
        .bind(pref.ignored as i64)
        .bind(pref.message_count)
        .bind(pref.response_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Increment a user's observed-message counter, creating the row if
    /// needed. Called for every inbound message, skipped or not.
    pub async fn record_message(&self, user_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_prefs (user_id, message_count)
            VALUES (?, 1)
            ON CONFLICT(user_id) DO UPDATE SET
                message_count = message_count + 1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Increment a user's replied-to counter.
    pub async fn record_response(&self, user_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_prefs (user_id, response_count)
            VALUES (?, 1)
            ON CONFLICT(user_id) DO UPDATE SET
                response_count = response_count + 1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ignored user ids.
    pub async fn ignored_users(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT user_id FROM user_prefs WHERE ignored = 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get("user_id").ok())
            .collect())
    }

    /// Append one conversation turn. Turns are immutable once written.
    pub async fn append_turn(
        &self,
        channel_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO turns (id, channel_id, user_id, role, content, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(channel_id)
        .bind(user_id)
        .bind(role.as_str())
        .bind(content)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent `limit` turns for a channel, oldest first.
    pub async fn list_recent_turns(
        &self,
        channel_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT id, channel_id, user_id, role, content, created_at \
             FROM turns WHERE channel_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut turns: Vec<ConversationTurn> = rows
            .into_iter()
            .map(|row| ConversationTurn {
                id: row.try_get("id").unwrap_or_default(),
                channel_id: row.try_get("channel_id").unwrap_or_default(),
                user_id: row.try_get("user_id").unwrap_or_default(),
                role: Role::from_str_lossy(&row.try_get::<String, _>("role").unwrap_or_default()),
                content: row.try_get("content").unwrap_or_default(),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect();

        // Reverse to chronological order
        turns.reverse();
        Ok(turns)
    }

    /// Append one error record.
    pub async fn append_error(
        &self,
        category: &str,
        message: &str,
        channel_id: Option<&str>,
        user_id: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO errors (id, category, message, channel_id, user_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(category)
        .bind(message)
        .bind(channel_id)
        .bind(user_id)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent error records, newest first.
    pub async fn recent_errors(&self, limit: i64) -> StoreResult<Vec<ErrorRecord>> {
        let rows = sqlx::query(
            "SELECT id, category, message, channel_id, user_id, created_at \
             FROM errors ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ErrorRecord {
                id: row.try_get("id").unwrap_or_default(),
                category: row.try_get("category").unwrap_or_default(),
                message: row.try_get("message").unwrap_or_default(),
                channel_id: row.try_get("channel_id").ok(),
                user_id: row.try_get("user_id").ok(),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect())
    }

    /// Delete conversation turns and error records strictly older than the
    /// cutoff. The only deletion path in the system.
    pub async fn delete_older_than(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<(u64, u64)> {
        let cutoff = cutoff.to_rfc3339();

        let turns = sqlx::query("DELETE FROM turns WHERE datetime(created_at) < datetime(?)")
            .bind(&cutoff)
            .execute(&self.pool)
            .await
            .context("failed to delete old turns")?
            .rows_affected();

        let errors = sqlx::query("DELETE FROM errors WHERE datetime(created_at) < datetime(?)")
            .bind(&cutoff)
            .execute(&self.pool)
            .await
            .context("failed to delete old errors")?
            .rows_affected();

        Ok((turns, errors))
    }
}
