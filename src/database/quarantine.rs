use chrono::{DateTime, Duration, Utc};
use sqlx::{query, query_as, query_scalar};
use teloxide::types::{MessageId, UserId};

use super::{uid, Database, Error};

/// How long an admitted user's introduction is kept around.
pub const HELLO_RETENTION_HOURS: i64 = 48;

#[derive(Debug, Clone, PartialEq)]
pub struct QuarantineEntry {
    pub user_id: UserId,
    pub related_message_ids: Vec<MessageId>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct QuarantineRow {
    user_id: i64,
    rel_messages: String,
    created_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
}

impl TryFrom<QuarantineRow> for QuarantineEntry {
    type Error = serde_json::Error;

    fn try_from(row: QuarantineRow) -> Result<Self, Self::Error> {
        let ids: Vec<i32> = serde_json::from_str(&row.rel_messages)?;
        Ok(Self {
            user_id: UserId(row.user_id as u64),
            related_message_ids: ids.into_iter().map(MessageId).collect(),
            created_at: row.created_at,
            deadline: row.deadline,
        })
    }
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct HelloMessage {
    pub user_id: i64,
    pub display_name: String,
    pub text: String,
    pub message_id: i32,
    pub accepted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Database {
    /// Starts a quarantine for `user`. Does nothing if one is already running.
    pub async fn add_quarantine(&self, user: UserId, minutes: i64) -> Result<(), Error> {
        let now = Utc::now();
        query(
            "INSERT INTO towel_quarantine (user_id, rel_messages, created_at, deadline)
            VALUES (?, '[]', ?, ?)
            ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(uid(user))
        .bind(now)
        .bind(now + Duration::minutes(minutes))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_quarantine(&self, user: UserId) -> Result<Option<QuarantineEntry>, Error> {
        let row: Option<QuarantineRow> = query_as(
            "SELECT user_id, rel_messages, created_at, deadline
            FROM towel_quarantine WHERE user_id = ?",
        )
        .bind(uid(user))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(QuarantineEntry::try_from).transpose()?)
    }

    pub async fn is_in_quarantine(&self, user: UserId) -> Result<bool, Error> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM towel_quarantine WHERE user_id = ?")
            .bind(uid(user))
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Attaches `message` to the user's entry. Returns `false` if there is no entry.
    pub async fn add_quarantine_rel_message(
        &self,
        user: UserId,
        message: MessageId,
    ) -> Result<bool, Error> {
        let mut transaction = self.pool.begin().await?;

        let rel: Option<String> =
            query_scalar("SELECT rel_messages FROM towel_quarantine WHERE user_id = ?")
                .bind(uid(user))
                .fetch_optional(&mut *transaction)
                .await?;

        let Some(rel) = rel else {
            transaction.rollback().await?;
            return Ok(false);
        };

        let mut ids: Vec<i32> = serde_json::from_str(&rel)?;
        if !ids.contains(&message.0) {
            ids.push(message.0);
            query("UPDATE towel_quarantine SET rel_messages = ? WHERE user_id = ?")
                .bind(serde_json::to_string(&ids)?)
                .bind(uid(user))
                .execute(&mut *transaction)
                .await?;
        }

        transaction.commit().await?;

        Ok(true)
    }

    pub async fn remove_quarantine(&self, user: UserId) -> Result<bool, Error> {
        query("DELETE FROM towel_quarantine WHERE user_id = ?")
            .bind(uid(user))
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(Into::into)
    }

    pub async fn remove_all_quarantine(&self) -> Result<u64, Error> {
        query("DELETE FROM towel_quarantine")
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(Into::into)
    }

    pub async fn get_all_quarantine(&self) -> Result<Vec<QuarantineEntry>, Error> {
        let rows: Vec<QuarantineRow> = query_as(
            "SELECT user_id, rel_messages, created_at, deadline
            FROM towel_quarantine ORDER BY deadline",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(QuarantineEntry::try_from)
            .collect::<Result<_, _>>()?)
    }

    /// Entries whose deadline lies strictly before `now`.
    pub async fn get_expired_quarantine(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuarantineEntry>, Error> {
        Ok(self
            .get_all_quarantine()
            .await?
            .into_iter()
            .filter(|entry| entry.deadline < now)
            .collect())
    }

    pub async fn save_hello(
        &self,
        user: UserId,
        display_name: &str,
        text: &str,
        message: MessageId,
    ) -> Result<HelloMessage, Error> {
        let accepted_at = Utc::now();
        let hello = HelloMessage {
            user_id: uid(user),
            display_name: display_name.to_string(),
            text: text.to_string(),
            message_id: message.0,
            accepted_at,
            expires_at: accepted_at + Duration::hours(HELLO_RETENTION_HOURS),
        };

        query(
            "INSERT INTO towel_hello (user_id, display_name, text, message_id, accepted_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id)
            DO UPDATE SET display_name = excluded.display_name, text = excluded.text,
                message_id = excluded.message_id, accepted_at = excluded.accepted_at,
                expires_at = excluded.expires_at",
        )
        .bind(hello.user_id)
        .bind(&hello.display_name)
        .bind(&hello.text)
        .bind(hello.message_id)
        .bind(hello.accepted_at)
        .bind(hello.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(hello)
    }

    /// The user's introduction, unless its retention window has passed.
    pub async fn get_hello(
        &self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<HelloMessage>, Error> {
        let hello: Option<HelloMessage> = query_as("SELECT * FROM towel_hello WHERE user_id = ?")
            .bind(uid(user))
            .fetch_optional(&self.pool)
            .await?;
        Ok(hello.filter(|h| h.expires_at > now))
    }

    pub async fn remove_expired_hello(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let expired: Vec<HelloMessage> = query_as("SELECT * FROM towel_hello")
            .fetch_all(&self.pool)
            .await?;

        let mut removed = 0;
        for hello in expired.into_iter().filter(|h| h.expires_at <= now) {
            removed += query("DELETE FROM towel_hello WHERE user_id = ?")
                .bind(hello.user_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }
}
