//! DispatcherActor - schedules outbound calls for one campaign
//!
//! The actor owns the latest row snapshot, the control mode and the set of
//! rows it has handed to initiation tasks. Every snapshot, config change and
//! control command runs through the mailbox, so ticks never interleave.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use shared_types::{
    CallingConfig, CampaignRow, CampaignTotals, DispatcherMode, DispatcherStatus, RowStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::actors::dispatcher::{
    protocol::{DispatcherError, DispatcherMsg},
    state::{
        available_slots, reset_targets, select_dispatchable, unobserved_claims, ControlCommand,
        DispatcherState,
    },
};
use crate::campaign::CampaignContext;
use crate::initiator::{CallInitiator, InitiationOutcome};
use crate::placement::CallPlacement;
use crate::projector;
use crate::store::{RowPatch, RowStore};

/// Delay before re-ticking after an initiation gave its row back.
const RETRY_TICK_DELAY: Duration = Duration::from_millis(250);

/// DispatcherActor - one per campaign
#[derive(Debug, Default)]
pub struct DispatcherActor;

/// Arguments for spawning DispatcherActor
#[derive(Clone)]
pub struct DispatcherArguments {
    /// Campaign identity, prompt, columns and calling config
    pub context: CampaignContext,
    /// Source of row snapshots and sink for row updates
    pub store: Arc<dyn RowStore>,
    /// External call placement service
    pub placement: Arc<dyn CallPlacement>,
}

/// Internal state for DispatcherActor
pub struct DispatcherActorState {
    context: CampaignContext,
    dispatch: DispatcherState,
    /// Latest snapshot, ascending by id
    rows: Vec<CampaignRow>,
    /// Rows handed to an initiation task and not yet seen leaving `pending`
    claimed: HashSet<String>,
    /// Rows whose initiation task has not reported back yet
    initiating: HashSet<String>,
    retry_scheduled: bool,
    has_been_run: bool,
    store: Arc<dyn RowStore>,
    initiator: CallInitiator,
    status_tx: watch::Sender<DispatcherStatus>,
    feed_task: JoinHandle<()>,
}

impl DispatcherActorState {
    fn status(&self) -> DispatcherStatus {
        DispatcherStatus {
            campaign_id: self.context.campaign_id.clone(),
            mode: self.dispatch.mode,
            totals: self.dispatch.totals,
            has_been_run: self.has_been_run,
        }
    }
}

#[async_trait]
impl Actor for DispatcherActor {
    type Msg = DispatcherMsg;
    type State = DispatcherActorState;
    type Arguments = DispatcherArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let mut context = args.context;
        context.calling = clamp_calling(&context.campaign_id, context.calling);

        tracing::info!(
            actor_id = %myself.get_id(),
            campaign_id = %context.campaign_id,
            concurrency_limit = context.calling.concurrency_limit,
            "DispatcherActor starting"
        );

        let mut feed = args.store.subscribe(&context.campaign_id).await?;
        let rows = sorted(feed.borrow_and_update().clone());

        let feed_ref = myself.clone();
        let feed_task = tokio::spawn(async move {
            while feed.changed().await.is_ok() {
                let rows = feed.borrow_and_update().clone();
                if feed_ref
                    .send_message(DispatcherMsg::SnapshotChanged { rows })
                    .is_err()
                {
                    break;
                }
            }
        });

        let totals = projector::project(&rows, &context.phone_column);
        let has_been_run = projector::has_been_run(&rows, &context.phone_column);
        let (status_tx, _) = watch::channel(DispatcherStatus {
            campaign_id: context.campaign_id.clone(),
            mode: DispatcherMode::Idle,
            totals,
            has_been_run,
        });

        Ok(DispatcherActorState {
            dispatch: DispatcherState {
                mode: DispatcherMode::Idle,
                totals,
            },
            rows,
            claimed: HashSet::new(),
            initiating: HashSet::new(),
            retry_scheduled: false,
            has_been_run,
            initiator: CallInitiator::new(args.store.clone(), args.placement),
            store: args.store,
            status_tx,
            feed_task,
            context,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            DispatcherMsg::SnapshotChanged { rows } => {
                self.absorb_snapshot(state, rows);
                self.tick(&myself, state);
            }
            DispatcherMsg::UpdateCallingConfig { config } => {
                state.context.calling = clamp_calling(&state.context.campaign_id, config);
                tracing::info!(
                    campaign_id = %state.context.campaign_id,
                    concurrency_limit = state.context.calling.concurrency_limit,
                    "Calling config updated"
                );
                self.tick(&myself, state);
            }
            DispatcherMsg::Start { prompt_override } => {
                self.handle_start(state, prompt_override);
                self.tick(&myself, state);
            }
            DispatcherMsg::Pause => self.control(state, ControlCommand::Pause),
            DispatcherMsg::Resume => {
                self.control(state, ControlCommand::Resume);
                self.tick(&myself, state);
            }
            DispatcherMsg::Stop => self.control(state, ControlCommand::Stop),
            DispatcherMsg::ResetRows { from_index, reply } => {
                let result = self.handle_reset_rows(state, from_index).await;
                let _ = reply.send(result);
                self.tick(&myself, state);
            }
            DispatcherMsg::Relaunch {
                from_index,
                prompt_override,
                reply,
            } => {
                let result = self.handle_reset_rows(state, from_index).await;
                if result.is_ok() {
                    self.handle_start(state, prompt_override);
                }
                let _ = reply.send(result);
                self.tick(&myself, state);
            }
            DispatcherMsg::InitiationFinished { row_id, outcome } => {
                self.handle_initiation_finished(&myself, state, row_id, outcome);
            }
            DispatcherMsg::RetryTick => {
                state.retry_scheduled = false;
                self.tick(&myself, state);
            }
            DispatcherMsg::GetStatus { reply } => {
                let _ = reply.send(state.status());
            }
            DispatcherMsg::Subscribe { reply } => {
                let _ = reply.send(state.status_tx.subscribe());
            }
        }

        let next = state.status();
        state.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.feed_task.abort();
        tracing::info!(
            actor_id = %myself.get_id(),
            campaign_id = %state.context.campaign_id,
            in_flight = state.initiating.len(),
            "DispatcherActor stopped"
        );
        Ok(())
    }
}

fn sorted(mut rows: Vec<CampaignRow>) -> Vec<CampaignRow> {
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
}

fn clamp_calling(campaign_id: &str, mut config: CallingConfig) -> CallingConfig {
    if config.concurrency_limit == 0 {
        tracing::warn!(
            campaign_id = %campaign_id,
            "concurrency_limit of 0 clamped to 1"
        );
        config.concurrency_limit = 1;
    }
    config
}

impl DispatcherActor {
    /// Replace the snapshot, release claims the store has caught up with,
    /// and run completion detection.
    fn absorb_snapshot(&self, state: &mut DispatcherActorState, rows: Vec<CampaignRow>) {
        state.rows = sorted(rows);

        let still_pending: HashSet<&str> = state
            .rows
            .iter()
            .filter(|row| row.status == RowStatus::Pending)
            .map(|row| row.id.as_str())
            .collect();
        state
            .claimed
            .retain(|row_id| still_pending.contains(row_id.as_str()));

        let phone_column = &state.context.phone_column;
        let totals = projector::project(&state.rows, phone_column);
        state.has_been_run = projector::has_been_run(&state.rows, phone_column);
        self.observe_totals(state, totals);
    }

    fn observe_totals(&self, state: &mut DispatcherActorState, totals: CampaignTotals) {
        let before = state.dispatch.mode;
        state.dispatch = state.dispatch.observe(totals);
        if before == DispatcherMode::Running && state.dispatch.mode == DispatcherMode::Idle {
            tracing::info!(
                campaign_id = %state.context.campaign_id,
                total = totals.total_rows,
                completed = totals.completed_count,
                failed = totals.failed_count,
                "Campaign finished, dispatcher idle"
            );
        }
    }

    fn control(&self, state: &mut DispatcherActorState, command: ControlCommand) {
        let before = state.dispatch.mode;
        state.dispatch = state.dispatch.apply(command);
        if before != state.dispatch.mode {
            tracing::info!(
                campaign_id = %state.context.campaign_id,
                from = %before,
                to = %state.dispatch.mode,
                "Dispatcher mode changed"
            );
        } else {
            tracing::debug!(
                campaign_id = %state.context.campaign_id,
                mode = %before,
                command = ?command,
                "Control command had no effect"
            );
        }
    }

    fn handle_start(&self, state: &mut DispatcherActorState, prompt_override: Option<String>) {
        if let Some(prompt) = prompt_override {
            state.context.prompt_template = prompt;
        }
        if state.dispatch.totals.total_rows == 0 {
            tracing::warn!(
                campaign_id = %state.context.campaign_id,
                "Starting campaign with no valid rows; waiting for rows to arrive"
            );
        }
        self.control(state, ControlCommand::Start);
        // Catch campaigns that are already finished.
        let totals = state.dispatch.totals;
        self.observe_totals(state, totals);
    }

    async fn handle_reset_rows(
        &self,
        state: &mut DispatcherActorState,
        from_index: usize,
    ) -> Result<usize, DispatcherError> {
        let campaign_id = state.context.campaign_id.clone();
        let mut rows = sorted(state.store.rows(&campaign_id).await?);
        let targets: Vec<String> =
            reset_targets(&rows, from_index, &state.context.phone_column)
                .into_iter()
                .map(|row| row.id.clone())
                .collect();

        let mut reset = HashSet::new();
        let mut failures = Vec::new();
        for row_id in &targets {
            match state.store.update_row(row_id, RowPatch::reset()).await {
                Ok(()) => {
                    reset.insert(row_id.clone());
                }
                Err(e) => {
                    tracing::error!(
                        campaign_id = %campaign_id,
                        row_id = %row_id,
                        error = %e,
                        "Failed to reset row"
                    );
                    failures.push(e);
                }
            }
        }

        // The store feed may lag; re-read so the next tick sees the reset.
        let rows = match state.store.rows(&campaign_id).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(
                    campaign_id = %campaign_id,
                    error = %e,
                    "Re-read after reset failed, mirroring the reset locally"
                );
                let patch = RowPatch::reset();
                for row in rows.iter_mut().filter(|row| reset.contains(&row.id)) {
                    patch.apply(row);
                }
                rows
            }
        };
        state.claimed.retain(|row_id| !reset.contains(row_id));
        self.absorb_snapshot(state, rows);

        tracing::info!(
            campaign_id = %campaign_id,
            from_index,
            reset = reset.len(),
            failed = failures.len(),
            "Rows reset to pending"
        );

        match failures.first() {
            None => Ok(reset.len()),
            Some(first) => Err(DispatcherError::Store(format!(
                "{} of {} rows failed to reset: {first}",
                failures.len(),
                targets.len()
            ))),
        }
    }

    /// Free the row for selection again. A row given back without reaching
    /// `calling` is retried after a delay so a stale snapshot or a failing
    /// store does not spin; any other outcome ticks right away.
    fn handle_initiation_finished(
        &self,
        myself: &ActorRef<DispatcherMsg>,
        state: &mut DispatcherActorState,
        row_id: String,
        outcome: InitiationOutcome,
    ) {
        state.initiating.remove(&row_id);
        tracing::debug!(
            campaign_id = %state.context.campaign_id,
            row_id = %row_id,
            outcome = ?outcome,
            "Initiation finished"
        );

        if !outcome.released_claim() {
            self.tick(myself, state);
            return;
        }

        state.claimed.remove(&row_id);
        if state.retry_scheduled || !state.dispatch.is_running() {
            return;
        }
        state.retry_scheduled = true;
        let dispatcher = myself.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RETRY_TICK_DELAY).await;
            let _ = dispatcher.send_message(DispatcherMsg::RetryTick);
        });
    }

    /// Fill free slots with the next pending rows. Never awaits.
    fn tick(&self, myself: &ActorRef<DispatcherMsg>, state: &mut DispatcherActorState) {
        if !state.dispatch.is_running() {
            return;
        }

        // Claimed rows not yet seen in `calling`, plus rows still being
        // initiated (a reset can put those back to `pending` mid-request).
        let busy: HashSet<String> = state
            .claimed
            .union(&state.initiating)
            .cloned()
            .collect();
        let phone_column = &state.context.phone_column;
        let active = state.dispatch.totals.active_calls
            + unobserved_claims(&state.rows, phone_column, &busy);
        let slots = available_slots(state.context.calling.concurrency_limit, active);
        if slots == 0 {
            return;
        }

        let picks: Vec<CampaignRow> = select_dispatchable(&state.rows, phone_column, &busy, slots)
            .into_iter()
            .cloned()
            .collect();
        if picks.is_empty() {
            return;
        }

        tracing::debug!(
            campaign_id = %state.context.campaign_id,
            active,
            slots,
            dispatching = picks.len(),
            "Dispatch tick"
        );

        for row in picks {
            state.claimed.insert(row.id.clone());
            state.initiating.insert(row.id.clone());

            let initiator = state.initiator.clone();
            let context = state.context.clone();
            let dispatcher = myself.clone();
            tokio::spawn(async move {
                let outcome = initiator.initiate(&row, &context).await;
                let _ = dispatcher.send_message(DispatcherMsg::InitiationFinished {
                    row_id: row.id,
                    outcome,
                });
            });
        }
    }
}

/// Validate the campaign context and spawn its dispatcher.
pub async fn spawn_dispatcher(
    args: DispatcherArguments,
) -> Result<(ActorRef<DispatcherMsg>, JoinHandle<()>), DispatcherError> {
    if args.context.campaign_id.trim().is_empty() {
        return Err(DispatcherError::InvalidConfig(
            "campaign_id is required".to_string(),
        ));
    }
    if args.context.phone_column.trim().is_empty() {
        return Err(DispatcherError::InvalidConfig(
            "phone_column is required".to_string(),
        ));
    }

    Actor::spawn(None, DispatcherActor, args)
        .await
        .map_err(|e| DispatcherError::Unavailable(e.to_string()))
}
