use chrono::{DateTime, Utc};
use sqlx::{query, query_as};
use teloxide::types::UserId;

use super::{uid, Database, Error};
use crate::platform::Person;

/// Roulette statistics of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct HussarRecord {
    pub user_id: UserId,
    pub meta: Person,
    pub shot_counter: i64,
    pub miss_counter: i64,
    pub dead_counter: i64,
    pub total_time_in_club: i64,
    pub first_shot: DateTime<Utc>,
    pub last_shot: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct HussarRow {
    user_id: i64,
    meta: String,
    shot_counter: i64,
    miss_counter: i64,
    dead_counter: i64,
    total_time_in_club: i64,
    first_shot: DateTime<Utc>,
    last_shot: DateTime<Utc>,
}

impl TryFrom<HussarRow> for HussarRecord {
    type Error = serde_json::Error;

    fn try_from(row: HussarRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId(row.user_id as u64),
            meta: serde_json::from_str(&row.meta)?,
            shot_counter: row.shot_counter,
            miss_counter: row.miss_counter,
            dead_counter: row.dead_counter,
            total_time_in_club: row.total_time_in_club,
            first_shot: row.first_shot,
            last_shot: row.last_shot,
        })
    }
}

const HUSSAR_COLUMNS: &str = "user_id, meta, shot_counter, miss_counter, dead_counter,
    total_time_in_club, first_shot, last_shot";

impl Database {
    pub async fn get_hussar(&self, user: UserId) -> Result<Option<HussarRecord>, Error> {
        let row: Option<HussarRow> = query_as(&format!(
            "SELECT {HUSSAR_COLUMNS} FROM roll_hussars WHERE user_id = ?"
        ))
        .bind(uid(user))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HussarRecord::try_from).transpose()?)
    }

    /// Creates an empty record for `meta`. Existing records are left untouched.
    pub async fn add_hussar(&self, meta: &Person) -> Result<(), Error> {
        let now = Utc::now();
        query(
            "INSERT INTO roll_hussars (user_id, meta, first_shot, last_shot)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(uid(meta.id))
        .bind(serde_json::to_string(meta)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn hussar_miss(&self, user: UserId) -> Result<(), Error> {
        query(
            "UPDATE roll_hussars
            SET shot_counter = shot_counter + 1, miss_counter = miss_counter + 1, last_shot = ?
            WHERE user_id = ?",
        )
        .bind(Utc::now())
        .bind(uid(user))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn hussar_dead(&self, user: UserId, mute_min: i64) -> Result<(), Error> {
        query(
            "UPDATE roll_hussars
            SET shot_counter = shot_counter + 1,
                dead_counter = dead_counter + 1,
                total_time_in_club = total_time_in_club + ?,
                last_shot = ?
            WHERE user_id = ?",
        )
        .bind(mute_min * 60)
        .bind(Utc::now())
        .bind(uid(user))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_hussar(&self, user: UserId) -> Result<bool, Error> {
        query("DELETE FROM roll_hussars WHERE user_id = ?")
            .bind(uid(user))
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected() > 0)
            .map_err(Into::into)
    }

    pub async fn remove_all_hussars(&self) -> Result<u64, Error> {
        query("DELETE FROM roll_hussars")
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(Into::into)
    }

    /// All records, longest time in the club first.
    pub async fn get_all_hussars(&self) -> Result<Vec<HussarRecord>, Error> {
        let rows: Vec<HussarRow> = query_as(&format!(
            "SELECT {HUSSAR_COLUMNS} FROM roll_hussars
            ORDER BY total_time_in_club DESC, dead_counter DESC, user_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(HussarRecord::try_from)
            .collect::<Result<_, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: u64) -> Person {
        Person {
            id: UserId(id),
            is_bot: false,
            first_name: format!("user{id}"),
            last_name: None,
            username: None,
        }
    }

    #[tokio::test]
    async fn counters_add_up() {
        let db = Database::in_memory().await.unwrap();
        let user = person(200);
        db.add_hussar(&user).await.unwrap();

        db.hussar_miss(user.id).await.unwrap();
        db.hussar_miss(user.id).await.unwrap();
        db.hussar_dead(user.id, 960).await.unwrap();

        let record = db.get_hussar(user.id).await.unwrap().unwrap();
        assert_eq!(record.meta, user);
        assert_eq!(record.shot_counter, 3);
        assert_eq!(record.miss_counter, 2);
        assert_eq!(record.dead_counter, 1);
        assert_eq!(
            record.shot_counter,
            record.miss_counter + record.dead_counter
        );
        assert_eq!(record.total_time_in_club, 960 * 60);
        assert!(record.first_shot <= record.last_shot);
    }

    #[tokio::test]
    async fn add_hussar_keeps_existing_stats() {
        let db = Database::in_memory().await.unwrap();
        let user = person(1);
        db.add_hussar(&user).await.unwrap();
        db.hussar_miss(user.id).await.unwrap();
        db.add_hussar(&user).await.unwrap();
        assert_eq!(db.get_hussar(user.id).await.unwrap().unwrap().shot_counter, 1);
    }

    #[tokio::test]
    async fn leaderboard_is_sorted_by_time_in_club() {
        let db = Database::in_memory().await.unwrap();
        for (id, minutes) in [(1, 10), (2, 30), (3, 20)] {
            db.add_hussar(&person(id)).await.unwrap();
            db.hussar_dead(UserId(id), minutes).await.unwrap();
        }
        db.add_hussar(&person(4)).await.unwrap();

        let order: Vec<_> = db
            .get_all_hussars()
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.user_id.0)
            .collect();
        assert_eq!(order, vec![2, 3, 1, 4]);
    }

    #[tokio::test]
    async fn remove_one_and_all() {
        let db = Database::in_memory().await.unwrap();
        db.add_hussar(&person(1)).await.unwrap();
        db.add_hussar(&person(2)).await.unwrap();

        assert!(db.remove_hussar(UserId(1)).await.unwrap());
        assert!(db.get_hussar(UserId(1)).await.unwrap().is_none());
        assert_eq!(db.remove_all_hussars().await.unwrap(), 1);
        assert!(db.get_all_hussars().await.unwrap().is_empty());
    }
}
