//! In-memory row store
//!
//! Rows live in a `BTreeMap` keyed by id so snapshots come out in dispatch
//! order. Each campaign gets one `watch` channel, created lazily.

use async_trait::async_trait;
use shared_types::{CampaignRow, RowStatus};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{watch, Mutex};

use super::{RowPatch, RowStore, RowStoreError};

#[derive(Default)]
pub struct InMemoryRowStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    rows: BTreeMap<String, CampaignRow>,
    feeds: HashMap<String, watch::Sender<Vec<CampaignRow>>>,
}

impl MemoryInner {
    fn snapshot(&self, campaign_id: &str) -> Vec<CampaignRow> {
        self.rows
            .values()
            .filter(|row| row.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    fn publish(&self, campaign_id: &str) {
        if let Some(feed) = self.feeds.get(campaign_id) {
            feed.send_replace(self.snapshot(campaign_id));
        }
    }

    fn patch(
        &mut self,
        row_id: &str,
        expected: Option<RowStatus>,
        patch: &RowPatch,
    ) -> Result<bool, RowStoreError> {
        let row = self
            .rows
            .get_mut(row_id)
            .ok_or_else(|| RowStoreError::NotFound(row_id.to_string()))?;

        if expected.is_some_and(|status| status != row.status) {
            return Ok(false);
        }

        patch.apply(row);
        let campaign_id = row.campaign_id.clone();
        self.publish(&campaign_id);
        Ok(true)
    }
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `rows`
    pub fn with_rows(rows: impl IntoIterator<Item = CampaignRow>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| (row.id.clone(), row))
            .collect();
        Self {
            inner: Mutex::new(MemoryInner {
                rows,
                feeds: HashMap::new(),
            }),
        }
    }

    /// Current copy of a single row
    pub async fn row(&self, row_id: &str) -> Option<CampaignRow> {
        self.inner.lock().await.rows.get(row_id).cloned()
    }
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn subscribe(
        &self,
        campaign_id: &str,
    ) -> Result<watch::Receiver<Vec<CampaignRow>>, RowStoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(feed) = inner.feeds.get(campaign_id) {
            return Ok(feed.subscribe());
        }

        let (feed, receiver) = watch::channel(inner.snapshot(campaign_id));
        inner.feeds.insert(campaign_id.to_string(), feed);
        Ok(receiver)
    }

    async fn rows(&self, campaign_id: &str) -> Result<Vec<CampaignRow>, RowStoreError> {
        Ok(self.inner.lock().await.snapshot(campaign_id))
    }

    async fn update_row(&self, row_id: &str, patch: RowPatch) -> Result<(), RowStoreError> {
        self.inner.lock().await.patch(row_id, None, &patch)?;
        Ok(())
    }

    async fn update_row_if(
        &self,
        row_id: &str,
        expected: RowStatus,
        patch: RowPatch,
    ) -> Result<bool, RowStoreError> {
        self.inner.lock().await.patch(row_id, Some(expected), &patch)
    }

    async fn insert_rows(&self, rows: Vec<CampaignRow>) -> Result<usize, RowStoreError> {
        let mut inner = self.inner.lock().await;
        let mut touched = Vec::new();
        let mut inserted = 0;
        for row in rows {
            if inner.rows.contains_key(&row.id) {
                continue;
            }
            if !touched.contains(&row.campaign_id) {
                touched.push(row.campaign_id.clone());
            }
            inner.rows.insert(row.id.clone(), row);
            inserted += 1;
        }
        for campaign_id in touched {
            inner.publish(&campaign_id);
        }
        Ok(inserted)
    }
}
