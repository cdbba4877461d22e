//! Row store adapters
//!
//! The engine never owns campaign rows; it reads them through a push-based
//! snapshot feed and writes them back with partial updates. Two adapters ship
//! with the crate:
//!
//! - [`InMemoryRowStore`] for tests and embedding
//! - [`SqliteRowStore`] used by the `campaign-runner` binary
//!
//! Snapshots are always ordered by ascending row id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{CampaignRow, RowStatus};
use tokio::sync::watch;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryRowStore;
pub use sqlite::{run_snapshot_refresh, SqliteRowStore};

/// Errors surfaced by row store adapters
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RowStoreError {
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RowStoreError {
    fn from(e: sqlx::Error) -> Self {
        RowStoreError::Database(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for RowStoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        RowStoreError::Database(format!("migration failed: {e}"))
    }
}

impl From<serde_json::Error> for RowStoreError {
    fn from(e: serde_json::Error) -> Self {
        RowStoreError::Serialization(e.to_string())
    }
}

/// Partial row update. `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPatch {
    pub status: Option<RowStatus>,
    pub call_id: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
    pub called_at: Option<Option<DateTime<Utc>>>,
}

impl RowPatch {
    pub fn status(status: RowStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Optimistic flip written before the external call is issued
    pub fn calling(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(RowStatus::Calling),
            called_at: Some(Some(at)),
            ..Self::default()
        }
    }

    pub fn call_placed(call_id: impl Into<String>) -> Self {
        Self {
            call_id: Some(Some(call_id.into())),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(RowStatus::Failed),
            last_error: Some(Some(error.into())),
            ..Self::default()
        }
    }

    /// Back to `pending` with every call trace cleared
    pub fn reset() -> Self {
        Self {
            status: Some(RowStatus::Pending),
            call_id: Some(None),
            last_error: Some(None),
            called_at: Some(None),
        }
    }

    pub fn apply(&self, row: &mut CampaignRow) {
        if let Some(status) = self.status {
            row.status = status;
        }
        if let Some(call_id) = &self.call_id {
            row.call_id = call_id.clone();
        }
        if let Some(last_error) = &self.last_error {
            row.last_error = last_error.clone();
        }
        if let Some(called_at) = self.called_at {
            row.called_at = called_at;
        }
    }
}

/// Storage boundary for campaign rows
#[async_trait]
pub trait RowStore: Send + Sync + 'static {
    /// Live snapshot feed for one campaign. The receiver holds the current
    /// snapshot immediately and is updated after every write.
    async fn subscribe(
        &self,
        campaign_id: &str,
    ) -> Result<watch::Receiver<Vec<CampaignRow>>, RowStoreError>;

    /// Point-in-time read of one campaign's rows
    async fn rows(&self, campaign_id: &str) -> Result<Vec<CampaignRow>, RowStoreError>;

    /// Unconditional partial update
    async fn update_row(&self, row_id: &str, patch: RowPatch) -> Result<(), RowStoreError>;

    /// Partial update applied only while the row is still in `expected`.
    /// Returns `Ok(false)` when the row exists but its status differs.
    async fn update_row_if(
        &self,
        row_id: &str,
        expected: RowStatus,
        patch: RowPatch,
    ) -> Result<bool, RowStoreError>;

    /// Bulk insert; rows whose id already exists are left untouched.
    /// Returns how many rows were inserted.
    async fn insert_rows(&self, rows: Vec<CampaignRow>) -> Result<usize, RowStoreError>;
}
