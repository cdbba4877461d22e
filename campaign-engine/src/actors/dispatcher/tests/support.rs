use async_trait::async_trait;
use ractor::ActorRef;
use shared_types::{
    CallRequest, CallResponse, CallingConfig, CampaignColumn, CampaignRow, DispatcherMode,
    RowStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

use crate::actors::dispatcher::{self, spawn_dispatcher, DispatcherArguments, DispatcherMsg};
use crate::campaign::CampaignContext;
use crate::placement::{CallPlacement, PlacementError};
use crate::store::{InMemoryRowStore, RowPatch, RowStore, RowStoreError};

pub(crate) const CAMPAIGN_ID: &str = "camp-1";

const WAIT_TIMEOUT: Duration = Duration::from_secs(3);
const SETTLE: Duration = Duration::from_millis(60);

/// Records every request; rejects rows listed in `failing_rows`.
/// A gated placement holds each request until `release` hands out a permit.
#[derive(Default)]
pub(crate) struct FakePlacement {
    requests: Mutex<Vec<CallRequest>>,
    failing_rows: HashSet<String>,
    gate: Option<Semaphore>,
}

impl FakePlacement {
    pub(crate) fn failing(rows: &[&str]) -> Self {
        Self {
            failing_rows: rows.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        }
    }

    pub(crate) fn gated(failing_rows: &[&str]) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::failing(failing_rows)
        }
    }

    pub(crate) fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    pub(crate) fn requests(&self) -> Vec<CallRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Row ids called so far, sorted. Rows picked in the same tick are
    /// initiated concurrently, so arrival order is not meaningful.
    pub(crate) fn placed_rows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .requests()
            .into_iter()
            .map(|r| r.metadata.row_id)
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CallPlacement for FakePlacement {
    async fn place_call(&self, request: &CallRequest) -> Result<CallResponse, PlacementError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing_rows.contains(&request.metadata.row_id) {
            return Err(PlacementError::Rejected {
                status: 503,
                message: "line busy".to_string(),
            });
        }
        Ok(CallResponse {
            call_id: format!("call_{}", request.metadata.row_id),
        })
    }
}

/// Row store whose first `failures` conditional updates fail like a locked
/// database. Everything else goes to the wrapped in-memory store.
pub(crate) struct FlakyStore {
    inner: Arc<InMemoryRowStore>,
    failures: AtomicUsize,
}

#[async_trait]
impl RowStore for FlakyStore {
    async fn subscribe(
        &self,
        campaign_id: &str,
    ) -> Result<watch::Receiver<Vec<CampaignRow>>, RowStoreError> {
        self.inner.subscribe(campaign_id).await
    }

    async fn rows(&self, campaign_id: &str) -> Result<Vec<CampaignRow>, RowStoreError> {
        self.inner.rows(campaign_id).await
    }

    async fn update_row(&self, row_id: &str, patch: RowPatch) -> Result<(), RowStoreError> {
        self.inner.update_row(row_id, patch).await
    }

    async fn update_row_if(
        &self,
        row_id: &str,
        expected: RowStatus,
        patch: RowPatch,
    ) -> Result<bool, RowStoreError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RowStoreError::Database("database is locked".to_string()));
        }
        self.inner.update_row_if(row_id, expected, patch).await
    }

    async fn insert_rows(&self, rows: Vec<CampaignRow>) -> Result<usize, RowStoreError> {
        self.inner.insert_rows(rows).await
    }
}

pub(crate) fn row(id: &str, phone: &str) -> CampaignRow {
    let mut data = HashMap::new();
    data.insert("name".to_string(), format!("Contact {id}"));
    data.insert("phone".to_string(), phone.to_string());
    CampaignRow::new(id, CAMPAIGN_ID, data)
}

pub(crate) fn rows(ids: &[&str]) -> Vec<CampaignRow> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| row(id, &format!("60011{i:04}")))
        .collect()
}

pub(crate) fn with_status(mut rows: Vec<CampaignRow>, status: RowStatus) -> Vec<CampaignRow> {
    for row in &mut rows {
        row.status = status;
        if status != RowStatus::Pending {
            row.call_id = Some(format!("call_{}", row.id));
            row.called_at = Some(chrono::Utc::now());
        }
    }
    rows
}

pub(crate) fn context(concurrency_limit: u32) -> CampaignContext {
    let mut ctx = CampaignContext::new(CAMPAIGN_ID, "agent_42");
    ctx.prompt_template = "Hola {{Nombre}}".to_string();
    ctx.columns = vec![CampaignColumn::new("name", "Nombre")];
    ctx.calling = CallingConfig {
        from_number: "+34910000000".to_string(),
        concurrency_limit,
        ..Default::default()
    };
    ctx
}

pub(crate) struct TestDispatcher {
    pub dispatcher: ActorRef<DispatcherMsg>,
    pub store: Arc<InMemoryRowStore>,
    pub placement: Arc<FakePlacement>,
}

pub(crate) async fn setup_test_dispatcher(
    rows: Vec<CampaignRow>,
    concurrency_limit: u32,
) -> TestDispatcher {
    setup_with_placement(rows, concurrency_limit, FakePlacement::default()).await
}

pub(crate) async fn setup_with_placement(
    rows: Vec<CampaignRow>,
    concurrency_limit: u32,
    placement: FakePlacement,
) -> TestDispatcher {
    setup_dispatcher(rows, concurrency_limit, placement, 0).await
}

/// Dispatcher whose first `claim_failures` conditional store writes fail.
pub(crate) async fn setup_with_flaky_store(
    rows: Vec<CampaignRow>,
    concurrency_limit: u32,
    claim_failures: usize,
) -> TestDispatcher {
    setup_dispatcher(rows, concurrency_limit, FakePlacement::default(), claim_failures).await
}

async fn setup_dispatcher(
    rows: Vec<CampaignRow>,
    concurrency_limit: u32,
    placement: FakePlacement,
    claim_failures: usize,
) -> TestDispatcher {
    let store = Arc::new(InMemoryRowStore::with_rows(rows));
    let placement = Arc::new(placement);
    let dispatch_store: Arc<dyn RowStore> = if claim_failures == 0 {
        store.clone()
    } else {
        Arc::new(FlakyStore {
            inner: store.clone(),
            failures: AtomicUsize::new(claim_failures),
        })
    };

    let args = DispatcherArguments {
        context: context(concurrency_limit),
        store: dispatch_store,
        placement: placement.clone(),
    };
    let (dispatcher, _handle) = spawn_dispatcher(args).await.unwrap();

    TestDispatcher {
        dispatcher,
        store,
        placement,
    }
}

impl TestDispatcher {
    pub(crate) async fn mode(&self) -> DispatcherMode {
        dispatcher::status(&self.dispatcher).await.unwrap().mode
    }

    pub(crate) async fn status_of(&self, row_id: &str) -> RowStatus {
        self.store.row(row_id).await.unwrap().status
    }

    pub(crate) async fn calling_rows(&self) -> Vec<String> {
        self.store
            .rows(CAMPAIGN_ID)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.status == RowStatus::Calling)
            .map(|r| r.id)
            .collect()
    }

    /// Simulate the call-result webhook marking a row done.
    pub(crate) async fn finish(&self, row_id: &str, status: RowStatus) {
        self.store
            .update_row(row_id, RowPatch::status(status))
            .await
            .unwrap();
    }

    /// Let spawned initiation tasks and queued snapshots drain.
    pub(crate) async fn settle(&self) {
        tokio::time::sleep(SETTLE).await;
        dispatcher::status(&self.dispatcher).await.unwrap();
    }

    pub(crate) async fn wait_for_calls(&self, count: usize) {
        let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
            while self.placement.requests().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "expected {count} calls, got {:?}",
            self.placement.placed_rows()
        );
    }

    pub(crate) async fn wait_for_mode(&self, mode: DispatcherMode) {
        let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
            while self.mode().await != mode {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "dispatcher never reached {mode}");
    }

    pub(crate) async fn wait_for_row(&self, row_id: &str, status: RowStatus) {
        let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
            while self.status_of(row_id).await != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "row {row_id} never reached {status}");
    }

    pub(crate) fn stop_actor(self) {
        self.dispatcher.stop(None);
    }
}
