//! SQLite-backed segment catalog.
//!
//! Handles connection and migrations. Row reads and writes live in `rows`.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Handle to the segment status catalog.
#[derive(Clone)]
pub struct CatalogDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl CatalogDb {
    /// Open the catalog file at `path`, creating it and its directory on
    /// first use.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let db = CatalogDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Private in-memory catalog; one connection so every query sees it.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = CatalogDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segment_status (
                hostname TEXT PRIMARY KEY,
                id INTEGER NOT NULL,
                status TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segment_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL,
                hostname TEXT NOT NULL,
                status TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                recorded_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS segment_history_host ON segment_history (hostname, seq)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Seconds since the epoch; 0 if the clock is before it.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
