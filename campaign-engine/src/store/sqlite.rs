//! SQLite-backed row store
//!
//! Schema (see `migrations/`):
//! ```sql
//! CREATE TABLE campaign_rows (
//!     id          TEXT PRIMARY KEY,
//!     campaign_id TEXT NOT NULL,
//!     data        TEXT NOT NULL,  -- JSON object, column id -> value
//!     status      TEXT NOT NULL,
//!     call_id     TEXT,
//!     last_error  TEXT,
//!     called_at   TEXT            -- RFC 3339
//! );
//! ```
//!
//! Every partial update is a single `UPDATE ... RETURNING` statement so the
//! conditional `pending -> calling` flip is atomic. After each write the
//! campaign is re-read and pushed to its `watch` feed, if anyone subscribed.
//! Writes from other processes are picked up by [`run_snapshot_refresh`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{CampaignRow, RowStatus};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::{RowPatch, RowStore, RowStoreError};

type RowRecord = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

const SELECT_CAMPAIGN_ROWS: &str = "SELECT id, campaign_id, data, status, call_id, last_error, called_at
     FROM campaign_rows WHERE campaign_id = ? ORDER BY id";

const UPDATE_ROW: &str = "UPDATE campaign_rows SET
        status     = COALESCE(?1, status),
        call_id    = CASE WHEN ?2 THEN ?3 ELSE call_id END,
        last_error = CASE WHEN ?4 THEN ?5 ELSE last_error END,
        called_at  = CASE WHEN ?6 THEN ?7 ELSE called_at END
     WHERE id = ?8 AND (?9 IS NULL OR status = ?9)
     RETURNING campaign_id";

pub struct SqliteRowStore {
    pool: SqlitePool,
    feeds: Mutex<HashMap<String, watch::Sender<Vec<CampaignRow>>>>,
}

impl SqliteRowStore {
    /// Open (or create) the database file and run migrations.
    /// Accepts both `sqlite:./foo.db` and plain paths.
    pub async fn connect(database_url: &str) -> Result<Self, RowStoreError> {
        let file_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let abs_path = std::env::current_dir()
            .map_err(|e| RowStoreError::Database(e.to_string()))?
            .join(file_path);
        if let Some(parent) = abs_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RowStoreError::Database(e.to_string()))?;
        }

        let pool = SqlitePool::connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&abs_path)
                .create_if_missing(true),
        )
        .await?;

        tracing::info!(database = %abs_path.display(), "Opened campaign row database");
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool; migrations are applied.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, RowStoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            feeds: Mutex::new(HashMap::new()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Re-read a subscribed campaign and push it if anything changed.
    /// Picks up rows written by other processes, such as call-result webhooks.
    pub async fn refresh(&self, campaign_id: &str) -> Result<bool, RowStoreError> {
        let feeds = self.feeds.lock().await;
        let Some(feed) = feeds.get(campaign_id) else {
            return Ok(false);
        };

        let rows = self.load(campaign_id).await?;
        Ok(feed.send_if_modified(|current| {
            if *current == rows {
                return false;
            }
            *current = rows;
            true
        }))
    }

    async fn load(&self, campaign_id: &str) -> Result<Vec<CampaignRow>, RowStoreError> {
        let records: Vec<RowRecord> = sqlx::query_as(SELECT_CAMPAIGN_ROWS)
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;

        records.into_iter().map(decode_row).collect()
    }

    async fn publish(&self, campaign_id: &str) {
        let feeds = self.feeds.lock().await;
        let Some(feed) = feeds.get(campaign_id) else {
            return;
        };

        match self.load(campaign_id).await {
            Ok(rows) => {
                feed.send_replace(rows);
            }
            Err(e) => {
                tracing::warn!(
                    campaign_id = %campaign_id,
                    error = %e,
                    "Failed to refresh campaign snapshot after write"
                );
            }
        }
    }

    async fn apply_patch(
        &self,
        row_id: &str,
        expected: Option<RowStatus>,
        patch: &RowPatch,
    ) -> Result<Option<String>, RowStoreError> {
        let called_at = patch
            .called_at
            .as_ref()
            .map(|value| value.map(|at| at.to_rfc3339()));

        let updated: Option<(String,)> = sqlx::query_as(UPDATE_ROW)
            .bind(patch.status.map(|status| status.as_str()))
            .bind(patch.call_id.is_some())
            .bind(patch.call_id.clone().flatten())
            .bind(patch.last_error.is_some())
            .bind(patch.last_error.clone().flatten())
            .bind(called_at.is_some())
            .bind(called_at.flatten())
            .bind(row_id)
            .bind(expected.map(|status| status.as_str()))
            .fetch_optional(&self.pool)
            .await?;

        Ok(updated.map(|(campaign_id,)| campaign_id))
    }

    async fn exists(&self, row_id: &str) -> Result<bool, RowStoreError> {
        let found: Option<(String,)> = sqlx::query_as("SELECT id FROM campaign_rows WHERE id = ?")
            .bind(row_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

/// Poll a campaign for external writes every `period`.
pub async fn run_snapshot_refresh(
    store: Arc<SqliteRowStore>,
    campaign_id: String,
    period: std::time::Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick is immediate; skip it
    loop {
        interval.tick().await;
        match store.refresh(&campaign_id).await {
            Ok(true) => {
                tracing::debug!(campaign_id = %campaign_id, "External row changes picked up")
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(campaign_id = %campaign_id, error = %e, "Snapshot refresh failed")
            }
        }
    }
}

fn decode_row(record: RowRecord) -> Result<CampaignRow, RowStoreError> {
    let (id, campaign_id, data, status, call_id, last_error, called_at) = record;

    let status = status
        .parse::<RowStatus>()
        .map_err(RowStoreError::Serialization)?;
    let called_at = called_at
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| RowStoreError::Serialization(format!("called_at {raw}: {e}")))
        })
        .transpose()?;

    Ok(CampaignRow {
        id,
        campaign_id,
        data: serde_json::from_str(&data)?,
        status,
        call_id,
        last_error,
        called_at,
    })
}

#[async_trait]
impl RowStore for SqliteRowStore {
    async fn subscribe(
        &self,
        campaign_id: &str,
    ) -> Result<watch::Receiver<Vec<CampaignRow>>, RowStoreError> {
        let mut feeds = self.feeds.lock().await;
        if let Some(feed) = feeds.get(campaign_id) {
            return Ok(feed.subscribe());
        }

        let (feed, receiver) = watch::channel(self.load(campaign_id).await?);
        feeds.insert(campaign_id.to_string(), feed);
        Ok(receiver)
    }

    async fn rows(&self, campaign_id: &str) -> Result<Vec<CampaignRow>, RowStoreError> {
        self.load(campaign_id).await
    }

    async fn update_row(&self, row_id: &str, patch: RowPatch) -> Result<(), RowStoreError> {
        let campaign_id = self
            .apply_patch(row_id, None, &patch)
            .await?
            .ok_or_else(|| RowStoreError::NotFound(row_id.to_string()))?;
        self.publish(&campaign_id).await;
        Ok(())
    }

    async fn update_row_if(
        &self,
        row_id: &str,
        expected: RowStatus,
        patch: RowPatch,
    ) -> Result<bool, RowStoreError> {
        match self.apply_patch(row_id, Some(expected), &patch).await? {
            Some(campaign_id) => {
                self.publish(&campaign_id).await;
                Ok(true)
            }
            None if self.exists(row_id).await? => Ok(false),
            None => Err(RowStoreError::NotFound(row_id.to_string())),
        }
    }

    async fn insert_rows(&self, rows: Vec<CampaignRow>) -> Result<usize, RowStoreError> {
        let mut tx = self.pool.begin().await?;
        let mut touched: Vec<String> = Vec::new();
        let mut inserted = 0;

        for row in &rows {
            let data = serde_json::to_string(&row.data)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO campaign_rows
                    (id, campaign_id, data, status, call_id, last_error, called_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.campaign_id)
            .bind(data)
            .bind(row.status.as_str())
            .bind(&row.call_id)
            .bind(&row.last_error)
            .bind(row.called_at.map(|at| at.to_rfc3339()))
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                inserted += 1;
                if !touched.contains(&row.campaign_id) {
                    touched.push(row.campaign_id.clone());
                }
            }
        }

        tx.commit().await?;

        for campaign_id in touched {
            self.publish(&campaign_id).await;
        }
        Ok(inserted)
    }
}
