use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;

use crate::checkpoint::CheckpointStore;
use crate::error::IndexerError;
use crate::models::IndexState;

/// SQLite-backed checkpoint store: one row per stream holding the JSON record.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, IndexerError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| IndexerError::Configuration(format!("database url: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(IndexerError::persistence)?;
        let db = Self { pool };
        db.create_tables().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<(), IndexerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                stream_id TEXT PRIMARY KEY,
                max_block INTEGER NOT NULL,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(IndexerError::persistence)?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for Database {
    async fn load(&self, stream_id: &str) -> Result<IndexState, IndexerError> {
        let row = sqlx::query("SELECT record FROM checkpoints WHERE stream_id = ?")
            .bind(stream_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(IndexerError::persistence)?;

        match row {
            Some(row) => {
                let record: String = row.get("record");
                serde_json::from_str(&record).map_err(|e| {
                    IndexerError::Persistence(format!("parse checkpoint '{stream_id}': {e}"))
                })
            }
            None => Ok(IndexState::default()),
        }
    }

    async fn save(&self, stream_id: &str, state: &IndexState) -> Result<(), IndexerError> {
        let record = serde_json::to_string(state).map_err(IndexerError::persistence)?;
        let max_block = state.last_scanned_block as i64;

        sqlx::query(
            r#"
            INSERT INTO checkpoints (stream_id, max_block, record, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(stream_id) DO UPDATE SET
                max_block = excluded.max_block,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(stream_id)
        .bind(max_block)
        .bind(record)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(IndexerError::persistence)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DisplayBalance;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sqlite_store_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("checkpoints.db").display());
        let db = Database::new(&url).await.unwrap();

        assert_eq!(db.load("transfers").await.unwrap(), IndexState::default());

        let mut state = IndexState {
            last_scanned_block: 100,
            ..Default::default()
        };
        state.address_balances.insert("0xA".into(), DisplayBalance(3.0));
        db.save("transfers", &state).await.unwrap();

        state.last_scanned_block = 150;
        db.save("transfers", &state).await.unwrap();

        let loaded = db.load("transfers").await.unwrap();
        assert_eq!(loaded.last_scanned_block, 150);
        assert_eq!(loaded.address_balances["0xA"], DisplayBalance(3.0));
    }
}
