//! SQLite storage backend
//!
//! Persistent storage implementation using SQLite.
//!
//! # Environment Variables
//!
//! - `TUNNELGATE_DATABASE_URL`: SQLite connection string
//!   e.g., `sqlite://./data/tunnelgate.sqlite3`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

use super::{ChannelRecord, ChannelStore, NewChannel, StorageError};

const COLUMNS: &str = "channel_id, description, broker_host, client_id, client_key, tunnel_id, \
                       tunnel_port, machine_id, expires_at, created_at, updated_at, deleted_at";

/// SQLite channel store implementation
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url`
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!("Connected to SQLite database");

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Private in-memory database, for tests
    pub async fn in_memory() -> Result<Self, StorageError> {
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS channels (
                channel_id INTEGER PRIMARY KEY AUTOINCREMENT,
                description TEXT NOT NULL,
                broker_host TEXT NOT NULL,
                client_id INTEGER NOT NULL,
                client_key TEXT NOT NULL,
                tunnel_id INTEGER NOT NULL,
                tunnel_port INTEGER NOT NULL,
                machine_id TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_channels_machine_id ON channels(machine_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Get the connection pool for direct access if needed
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_record(row: &SqliteRow) -> Result<ChannelRecord, StorageError> {
    let db = |e: sqlx::Error| StorageError::Database(e.to_string());

    let port: i64 = row.try_get("tunnel_port").map_err(db)?;
    let tunnel_port = u16::try_from(port)
        .map_err(|_| StorageError::Serialization(format!("tunnel port {port} out of range")))?;

    Ok(ChannelRecord {
        channel_id: row.try_get("channel_id").map_err(db)?,
        description: row.try_get("description").map_err(db)?,
        broker_host: row.try_get("broker_host").map_err(db)?,
        client_id: row.try_get("client_id").map_err(db)?,
        client_key: row.try_get("client_key").map_err(db)?,
        tunnel_id: row.try_get("tunnel_id").map_err(db)?,
        tunnel_port,
        machine_id: row.try_get("machine_id").map_err(db)?,
        expires_at: row.try_get::<DateTime<Utc>, _>("expires_at").map_err(db)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(db)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(db)?,
        deleted_at: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at").map_err(db)?,
    })
}

#[async_trait]
impl ChannelStore for SqliteStore {
    async fn insert(&self, channel: NewChannel) -> Result<ChannelRecord, StorageError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO channels (description, broker_host, client_id, client_key, tunnel_id,
                                  tunnel_port, machine_id, expires_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            "#,
        )
        .bind(&channel.description)
        .bind(&channel.broker_host)
        .bind(channel.client_id)
        .bind(&channel.client_key)
        .bind(channel.tunnel_id)
        .bind(i64::from(channel.tunnel_port))
        .bind(&channel.machine_id)
        .bind(channel.expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Database(e.to_string()))?;

        let record = ChannelRecord::from_new(result.last_insert_rowid(), channel, now);
        info!(
            channel_id = record.channel_id,
            machine_id = %record.machine_id,
            tunnel_port = record.tunnel_port,
            "Stored channel"
        );
        Ok(record)
    }

    async fn get(&self, channel_id: i64) -> Result<Option<ChannelRecord>, StorageError> {
        let sql = format!("SELECT {COLUMNS} FROM channels WHERE channel_id = ?1 AND deleted_at IS NULL");
        let row = sqlx::query(&sql)
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_active_by_machine(&self, machine_id: &str) -> Result<Vec<ChannelRecord>, StorageError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM channels WHERE machine_id = ?1 AND deleted_at IS NULL ORDER BY channel_id"
        );
        let rows = sqlx::query(&sql)
            .bind(machine_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.iter().map(row_to_record).collect()
    }

    async fn soft_delete(&self, channel_ids: &[i64]) -> Result<usize, StorageError> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut deleted = 0;
        for id in channel_ids {
            let result = sqlx::query(
                "UPDATE channels SET deleted_at = ?1, updated_at = ?1 WHERE channel_id = ?2 AND deleted_at IS NULL",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;
            deleted += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if deleted > 0 {
            info!(channel_ids = ?channel_ids, deleted = deleted, "Soft-deleted channels");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_channel(machine_id: &str, port: u16) -> NewChannel {
        NewChannel {
            description: "sqlite unit".into(),
            broker_host: "bridge:8024".into(),
            client_id: 10,
            client_key: format!("{machine_id}-1"),
            tunnel_id: 11,
            tunnel_port: port,
            machine_id: machine_id.into(),
            expires_at: Utc::now() + Duration::days(1),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = store.insert(new_channel("m", 40001)).await.unwrap();

        let fetched = store.get(record.channel_id).await.unwrap().unwrap();
        assert_eq!(fetched.tunnel_port, 40001);
        assert_eq!(fetched.machine_id, "m");
        assert_eq!(fetched.expires_at, record.expires_at);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_record() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = store.insert(new_channel("m", 1)).await.unwrap();
        let b = store.insert(new_channel("m", 2)).await.unwrap();

        assert_eq!(store.soft_delete(&[a.channel_id]).await.unwrap(), 1);
        assert_eq!(store.soft_delete(&[a.channel_id]).await.unwrap(), 0);

        assert!(store.get(a.channel_id).await.unwrap().is_none());
        let active: Vec<i64> = store
            .list_active_by_machine("m")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.channel_id)
            .collect();
        assert_eq!(active, vec![b.channel_id]);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("channels.sqlite3").display());

        let id = {
            let store = SqliteStore::new(&url).await.unwrap();
            store.insert(new_channel("m", 7)).await.unwrap().channel_id
        };

        let store = SqliteStore::new(&url).await.unwrap();
        assert!(store.get(id).await.unwrap().is_some());
    }
}
