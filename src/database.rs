mod hussars;
mod quarantine;

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{query, query_as, query_scalar};
use teloxide::types::UserId;
use thiserror::Error;

pub use hussars::HussarRecord;
pub use quarantine::{HelloMessage, QuarantineEntry, HELLO_RETENTION_HOURS};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("schema bootstrap failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("malformed json column: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handle to the bot's single-file datastore. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn uid(user: UserId) -> i64 {
    user.0 as i64
}

impl Database {
    pub async fn new(path: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePool::connect_with(options).await?;
        let db = Self { pool };
        db.bootstrap().await?;
        Ok(db)
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, Error> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.bootstrap().await?;
        Ok(db)
    }

    async fn bootstrap(&self) -> Result<(), Error> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }

    pub async fn trust(&self, user: UserId, admin: UserId) -> Result<(), Error> {
        query(
            "INSERT INTO trusted_users (user_id, trusted_by, trusted_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id)
            DO UPDATE SET trusted_by = excluded.trusted_by, trusted_at = excluded.trusted_at",
        )
        .bind(uid(user))
        .bind(uid(admin))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn untrust(&self, user: UserId) -> Result<bool, Error> {
        query("DELETE FROM trusted_users WHERE user_id = ?")
            .bind(uid(user))
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(Into::into)
    }

    pub async fn get_trusted(&self, user: UserId) -> Result<Option<TrustedUser>, Error> {
        let row: Option<TrustedRow> =
            query_as("SELECT user_id, trusted_by, trusted_at FROM trusted_users WHERE user_id = ?")
                .bind(uid(user))
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Into::into))
    }

    pub async fn is_trusted(&self, user: UserId) -> Result<bool, Error> {
        Ok(self.get_trusted(user).await?.is_some())
    }

    /// Bumps the counter of `topic` and returns the previous state, if any.
    pub async fn touch_since_topic(&self, topic: &str) -> Result<Option<SinceTopic>, Error> {
        let mut transaction = self.pool.begin().await?;

        let previous: Option<SinceTopic> =
            query_as("SELECT topic, count, since FROM since_topics WHERE topic = ?")
                .bind(topic)
                .fetch_optional(&mut *transaction)
                .await?;

        query(
            "INSERT INTO since_topics (topic, count, since)
            VALUES (?, 1, ?)
            ON CONFLICT(topic)
            DO UPDATE SET count = count + 1, since = excluded.since",
        )
        .bind(topic)
        .bind(Utc::now())
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;

        Ok(previous)
    }

    pub async fn get_since_topic(&self, topic: &str) -> Result<Option<SinceTopic>, Error> {
        query_as("SELECT topic, count, since FROM since_topics WHERE topic = ?")
            .bind(topic)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Case-folds `word` and increments its counter, returning the new count.
    pub async fn add_prism_word(&self, word: &str) -> Result<i64, Error> {
        let word = word.trim().to_lowercase();
        query_scalar(
            "INSERT INTO prism_words (word, count, last_use)
            VALUES (?, 1, ?)
            ON CONFLICT(word)
            DO UPDATE SET count = count + 1, last_use = excluded.last_use
            RETURNING count",
        )
        .bind(word)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn get_top_prism_words(&self, limit: i64) -> Result<Vec<PrismWord>, Error> {
        query_as(
            "SELECT word, count, last_use FROM prism_words
            ORDER BY count DESC, word ASC
            LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn add_peninsula_user(&self, user: UserId) -> Result<(), Error> {
        query(
            "INSERT INTO peninsula_users (user_id, added_at) VALUES (?, ?)
            ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(uid(user))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_peninsula_user(&self, user: UserId) -> Result<bool, Error> {
        query("DELETE FROM peninsula_users WHERE user_id = ?")
            .bind(uid(user))
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(Into::into)
    }

    pub async fn get_peninsula_users(&self) -> Result<Vec<UserId>, Error> {
        let ids: Vec<i64> = query_scalar("SELECT user_id FROM peninsula_users ORDER BY added_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(|id| UserId(id as u64)).collect())
    }

    pub async fn get_aoc_blob(&self) -> Result<Option<serde_json::Value>, Error> {
        let blob: Option<String> = query_scalar("SELECT blob FROM aoc_blob WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match blob {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }

    pub async fn set_aoc_blob(&self, blob: &serde_json::Value) -> Result<(), Error> {
        query(
            "INSERT INTO aoc_blob (id, blob, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at",
        )
        .bind(serde_json::to_string(blob)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrustedUser {
    pub user_id: UserId,
    pub trusted_by: UserId,
    pub trusted_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TrustedRow {
    user_id: i64,
    trusted_by: i64,
    trusted_at: DateTime<Utc>,
}

impl From<TrustedRow> for TrustedUser {
    fn from(row: TrustedRow) -> Self {
        Self {
            user_id: UserId(row.user_id as u64),
            trusted_by: UserId(row.trusted_by as u64),
            trusted_at: row.trusted_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SinceTopic {
    pub topic: String,
    pub count: i64,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PrismWord {
    pub word: String,
    pub count: i64,
    pub last_use: DateTime<Utc>,
}
