use crate::core::mentions::{LeaderboardEntry, MentionError, MentionStore, MentionTally};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;

/// SQLite-backed mention store.
///
/// One row per (guild, channel, user); rows appear on first mention via
/// upsert and are only removed by a whole-guild reset.
pub struct SqliteMentionStore {
    pool: Pool<Sqlite>,
}

impl SqliteMentionStore {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mention_counts (
                guild_id INTEGER NOT NULL,
                channel_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                received INTEGER NOT NULL DEFAULT 0,
                given INTEGER NOT NULL DEFAULT 0,
                last_mentioned_at TEXT,
                PRIMARY KEY (guild_id, channel_id, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MentionStore for SqliteMentionStore {
    async fn bump(
        &self,
        guild_id: u64,
        channel_id: u64,
        author_id: u64,
        mentioned: &[u64],
        at: DateTime<Utc>,
    ) -> Result<(), MentionError> {
        // All counters for one message land atomically or not at all.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MentionError::StorageError(e.to_string()))?;

        for &user_id in mentioned {
            sqlx::query(
                r#"
                INSERT INTO mention_counts (guild_id, channel_id, user_id, received, last_mentioned_at)
                VALUES (?, ?, ?, 1, ?)
                ON CONFLICT(guild_id, channel_id, user_id) DO UPDATE SET
                    received = received + 1,
                    last_mentioned_at = excluded.last_mentioned_at
                "#,
            )
            .bind(guild_id as i64)
            .bind(channel_id as i64)
            .bind(user_id as i64)
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| MentionError::StorageError(e.to_string()))?;
        }

        sqlx::query(
            r#"
            INSERT INTO mention_counts (guild_id, channel_id, user_id, given)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(guild_id, channel_id, user_id) DO UPDATE SET
                given = given + excluded.given
            "#,
        )
        .bind(guild_id as i64)
        .bind(channel_id as i64)
        .bind(author_id as i64)
        .bind(mentioned.len() as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| MentionError::StorageError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| MentionError::StorageError(e.to_string()))?;

        Ok(())
    }

    async fn tally(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        user_id: u64,
    ) -> Result<MentionTally, MentionError> {
        // SUM over zero rows is NULL, hence the COALESCE: an untracked user
        // must read as zero rather than error.
        let query = match channel_id {
            Some(ch) => sqlx::query(
                r#"
                SELECT COALESCE(SUM(received), 0) AS received,
                       COALESCE(SUM(given), 0) AS given,
                       MAX(last_mentioned_at) AS last_mentioned_at
                  FROM mention_counts
                 WHERE guild_id = ? AND channel_id = ? AND user_id = ?
                "#,
            )
            .bind(guild_id as i64)
            .bind(ch as i64)
            .bind(user_id as i64),
            None => sqlx::query(
                r#"
                SELECT COALESCE(SUM(received), 0) AS received,
                       COALESCE(SUM(given), 0) AS given,
                       MAX(last_mentioned_at) AS last_mentioned_at
                  FROM mention_counts
                 WHERE guild_id = ? AND user_id = ?
                "#,
            )
            .bind(guild_id as i64)
            .bind(user_id as i64),
        };

        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MentionError::StorageError(e.to_string()))?;

        Ok(MentionTally {
            user_id,
            received: row.get::<i64, _>("received") as u64,
            given: row.get::<i64, _>("given") as u64,
            last_mentioned_at: row
                .try_get::<Option<DateTime<Utc>>, _>("last_mentioned_at")
                .unwrap_or(None),
        })
    }

    async fn leaderboard(
        &self,
        guild_id: u64,
        channel_id: Option<u64>,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, MentionError> {
        let query = match channel_id {
            Some(ch) => sqlx::query(
                r#"
                SELECT user_id, SUM(received) AS total
                  FROM mention_counts
                 WHERE guild_id = ? AND channel_id = ?
                 GROUP BY user_id
                HAVING total > 0
                 ORDER BY total DESC
                 LIMIT ?
                "#,
            )
            .bind(guild_id as i64)
            .bind(ch as i64)
            .bind(limit as i64),
            None => sqlx::query(
                r#"
                SELECT user_id, SUM(received) AS total
                  FROM mention_counts
                 WHERE guild_id = ?
                 GROUP BY user_id
                HAVING total > 0
                 ORDER BY total DESC
                 LIMIT ?
                "#,
            )
            .bind(guild_id as i64)
            .bind(limit as i64),
        };

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MentionError::StorageError(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| LeaderboardEntry {
                user_id: row.get::<i64, _>("user_id") as u64,
                received: row.get::<i64, _>("total") as u64,
            })
            .collect())
    }

    async fn reset_guild(&self, guild_id: u64) -> Result<u64, MentionError> {
        let result = sqlx::query("DELETE FROM mention_counts WHERE guild_id = ?")
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| MentionError::StorageError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const GUILD: u64 = 11;
    const GENERAL: u64 = 110;
    const RANDOM: u64 = 120;

    async fn temp_store() -> (SqliteMentionStore, std::path::PathBuf) {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_owned();
        drop(tmp);

        let store = SqliteMentionStore::new(path.to_str().unwrap())
            .await
            .unwrap();
        (store, path)
    }

    #[tokio::test]
    async fn untracked_user_reads_as_zero() {
        let (store, _path) = temp_store().await;
        let tally = store.tally(GUILD, None, 42).await.unwrap();
        assert_eq!(tally.received, 0);
        assert_eq!(tally.given, 0);
        assert!(tally.last_mentioned_at.is_none());
    }

    #[tokio::test]
    async fn bump_upserts_and_accumulates() {
        let (store, _path) = temp_store().await;

        store
            .bump(GUILD, GENERAL, 10, &[20, 30], Utc::now())
            .await
            .unwrap();
        store
            .bump(GUILD, GENERAL, 10, &[20], Utc::now())
            .await
            .unwrap();

        let tally = store.tally(GUILD, None, 20).await.unwrap();
        assert_eq!(tally.received, 2);
        assert!(tally.last_mentioned_at.is_some());

        assert_eq!(store.tally(GUILD, None, 30).await.unwrap().received, 1);
        assert_eq!(store.tally(GUILD, None, 10).await.unwrap().given, 3);
    }

    #[tokio::test]
    async fn channel_scope_splits_guild_totals() {
        let (store, _path) = temp_store().await;

        store.bump(GUILD, GENERAL, 10, &[20], Utc::now()).await.unwrap();
        store.bump(GUILD, RANDOM, 10, &[20], Utc::now()).await.unwrap();
        store.bump(GUILD, RANDOM, 10, &[20], Utc::now()).await.unwrap();

        assert_eq!(
            store.tally(GUILD, Some(GENERAL), 20).await.unwrap().received,
            1
        );
        assert_eq!(
            store.tally(GUILD, Some(RANDOM), 20).await.unwrap().received,
            2
        );
        assert_eq!(store.tally(GUILD, None, 20).await.unwrap().received, 3);
    }

    #[tokio::test]
    async fn leaderboard_orders_by_received_descending() {
        let (store, _path) = temp_store().await;

        for _ in 0..4 {
            store.bump(GUILD, GENERAL, 10, &[30], Utc::now()).await.unwrap();
        }
        for _ in 0..2 {
            store.bump(GUILD, RANDOM, 10, &[20], Utc::now()).await.unwrap();
        }
        store.bump(GUILD, GENERAL, 10, &[40], Utc::now()).await.unwrap();

        let board = store.leaderboard(GUILD, None, 10).await.unwrap();
        assert_eq!(board.len(), 3);
        assert_eq!((board[0].user_id, board[0].received), (30, 4));
        assert_eq!((board[1].user_id, board[1].received), (20, 2));
        assert_eq!((board[2].user_id, board[2].received), (40, 1));

        let top_one = store.leaderboard(GUILD, None, 1).await.unwrap();
        assert_eq!(top_one.len(), 1);
        assert_eq!(top_one[0].user_id, 30);
    }

    #[tokio::test]
    async fn leaderboard_respects_channel_scope() {
        let (store, _path) = temp_store().await;

        store.bump(GUILD, GENERAL, 10, &[20], Utc::now()).await.unwrap();
        store.bump(GUILD, RANDOM, 10, &[30], Utc::now()).await.unwrap();

        let board = store.leaderboard(GUILD, Some(GENERAL), 10).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].user_id, 20);
    }

    #[tokio::test]
    async fn reset_removes_guild_rows_only() {
        let (store, _path) = temp_store().await;

        store.bump(GUILD, GENERAL, 10, &[20], Utc::now()).await.unwrap();
        store.bump(99, GENERAL, 10, &[20], Utc::now()).await.unwrap();

        let removed = store.reset_guild(GUILD).await.unwrap();
        assert_eq!(removed, 2); // target row plus the author's `given` row

        assert_eq!(store.tally(GUILD, None, 20).await.unwrap().received, 0);
        assert_eq!(store.tally(99, None, 20).await.unwrap().received, 1);
    }

    #[tokio::test]
    async fn counts_survive_a_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_owned();
        drop(tmp);

        let store = SqliteMentionStore::new(path.to_str().unwrap())
            .await
            .unwrap();
        store.bump(GUILD, GENERAL, 10, &[20], Utc::now()).await.unwrap();
        drop(store);

        // Reload from file
        let store2 = SqliteMentionStore::new(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(store2.tally(GUILD, None, 20).await.unwrap().received, 1);
    }
}
