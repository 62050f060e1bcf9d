//! Status and history rows: write and list.

use anyhow::Result;
use sqlx::Row;

use super::db::CatalogDb;
use super::types::{SegmentHistoryRow, SegmentState, SegmentStatusRow, SegmentStatusUpdate};

impl CatalogDb {
    /// Upsert the status row of a segment.
    pub async fn update_segment_status(&self, update: &SegmentStatusUpdate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO segment_status (hostname, id, status, description, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(hostname) DO UPDATE SET
                id = excluded.id,
                status = excluded.status,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&update.hostname)
        .bind(i64::from(update.id))
        .bind(update.state.as_str())
        .bind(&update.description)
        .bind(update.at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_segment_history_row(&self, update: &SegmentStatusUpdate) -> Result<i64> {
        let res = sqlx::query(
            r#"
            INSERT INTO segment_history (id, hostname, status, description, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(i64::from(update.id))
        .bind(&update.hostname)
        .bind(update.state.as_str())
        .bind(&update.description)
        .bind(update.at)
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    /// Status row and history row in one transaction.
    pub async fn record(&self, update: &SegmentStatusUpdate) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO segment_status (hostname, id, status, description, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(hostname) DO UPDATE SET
                id = excluded.id,
                status = excluded.status,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&update.hostname)
        .bind(i64::from(update.id))
        .bind(update.state.as_str())
        .bind(&update.description)
        .bind(update.at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO segment_history (id, hostname, status, description, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(i64::from(update.id))
        .bind(&update.hostname)
        .bind(update.state.as_str())
        .bind(&update.description)
        .bind(update.at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_segment_status(&self) -> Result<Vec<SegmentStatusRow>> {
        let rows = sqlx::query(
            r#"
            SELECT hostname, id, status, description, updated_at
            FROM segment_status
            ORDER BY hostname ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            out.push(SegmentStatusRow {
                id: row.get("id"),
                hostname: row.get("hostname"),
                state: SegmentState::from_str(&status),
                description: row.get("description"),
                updated_at: row.get("updated_at"),
            });
        }
        Ok(out)
    }

    /// History for one host, oldest first.
    pub async fn list_segment_history(&self, hostname: &str) -> Result<Vec<SegmentHistoryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, id, hostname, status, description, recorded_at
            FROM segment_history
            WHERE hostname = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(hostname)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            out.push(SegmentHistoryRow {
                seq: row.get("seq"),
                id: row.get("id"),
                hostname: row.get("hostname"),
                state: SegmentState::from_str(&status),
                description: row.get("description"),
                recorded_at: row.get("recorded_at"),
            });
        }
        Ok(out)
    }
}
